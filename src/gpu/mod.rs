//! GPU abstraction layer
//!
//! `GpuBackend` is the seam between the renderer's bookkeeping and a device.
//! `WgpuBackend` talks to wgpu; `HeadlessBackend` keeps everything in memory.

pub mod backend;
pub mod buffer_layouts;
pub mod headless;
pub mod recorder;
pub mod shader;
pub mod wgpu_backend;

pub use backend::{
    AllocationFailure, BackendLimits, BufferRequest, BufferRole, ComputeStateDescriptor,
    CullBindingResources, GpuBackend, MemoryTier, MeshBindingResources, RenderStateDescriptor,
    TextureArrayRequest,
};
pub use headless::{
    HeadlessBackend, HeadlessBuffer, HeadlessEncoder, HeadlessTexture, RecordedCommand, RecordingPass,
};
pub use recorder::{ComputeRecorder, DrawRecorder};
pub use shader::{ShaderBlob, ShaderCode, ShaderLibrary};
pub use wgpu_backend::WgpuBackend;
