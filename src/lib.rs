//! Strata Engine
//!
//! GPU-resident geometry arenas, batched mesh registration, frustum culling on
//! the CPU or in a compute pass, and draw submission for a small set of mesh
//! pipeline kinds.

pub mod camera;
pub mod config;
pub mod constants;
pub mod error;
pub mod gpu;
pub mod logging;
pub mod memory;
pub mod renderer;
pub mod scene;

pub use camera::{Camera, FrustumPlanes, FrustumSource};
pub use config::{DrawMode, MeshPipelineConfig, NamedPipelineConfig, PipelineConfig, RendererConfig};
pub use error::{EngineError, EngineResult};
pub use gpu::{GpuBackend, HeadlessBackend, WgpuBackend};
pub use memory::{BufferArena, DeviceMemoryBudget, MemoryUsage, StagingUploader};
pub use renderer::{FrameOutcome, MeshPipeline, Renderer};
pub use scene::{Mesh, MeshSource, Renderable, RenderableRegistry, TextureRegistry};
