//! Scene-side collaborators of the mesh pipelines
//!
//! Renderables expose their geometry through `MeshSource`; the registries own
//! name and index lookups for objects and textures.

pub mod registry;
pub mod renderable;
pub mod textures;

pub use registry::RenderableRegistry;
pub use renderable::{BoundingSphere, MaterialRef, Mesh, MeshSource, Renderable};
pub use textures::{TextureImage, TextureRegistry};
