//! Device abstraction used by the arenas, pipelines and frame loop.
//!
//! Everything above this trait (arena bookkeeping, batching, culling candidate
//! generation, draw ordering, frame pacing) is written once against
//! [`GpuBackend`]. [`super::WgpuBackend`] drives a real device;
//! [`super::HeadlessBackend`] keeps buffers in memory and emulates the cull
//! shader so the same code paths run in CI without an adapter.

use super::shader::ShaderBlob;
use crate::config::DrawMode;
use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use wgpu::BufferUsages;

/// Where an arena's memory lives
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryTier {
    /// GPU-resident, only reachable through staging copies
    DeviceLocal,
    /// CPU-writable, written in place
    HostVisible,
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryTier::DeviceLocal => write!(f, "device-local"),
            MemoryTier::HostVisible => write!(f, "host-visible"),
        }
    }
}

/// What a buffer is bound as
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Vertex,
    Index,
    Storage,
    Uniform,
    Indirect,
    DrawCount,
    Staging,
    Readback,
}

impl BufferRole {
    pub fn usages(self) -> BufferUsages {
        use super::buffer_layouts::usage;
        match self {
            BufferRole::Vertex => usage::VERTEX,
            BufferRole::Index => usage::INDEX,
            BufferRole::Storage => usage::STORAGE,
            BufferRole::Uniform => usage::UNIFORM,
            BufferRole::Indirect => usage::INDIRECT,
            BufferRole::DrawCount => usage::DRAW_COUNT,
            BufferRole::Staging => usage::STAGING,
            BufferRole::Readback => usage::READBACK,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BufferRequest<'a> {
    pub label: &'a str,
    pub size: u64,
    pub role: BufferRole,
    pub tier: MemoryTier,
}

/// Why a backend refused an allocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocationFailure {
    OutOfMemory,
    Rejected(String),
}

impl fmt::Display for AllocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationFailure::OutOfMemory => write!(f, "out of memory"),
            AllocationFailure::Rejected(reason) => write!(f, "{}", reason),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BackendLimits {
    pub max_buffer_size: u64,
    pub max_storage_binding_size: u64,
    pub max_push_constant_size: u32,
    pub supports_indirect_count: bool,
    pub max_texture_array_layers: u32,
}

impl Default for BackendLimits {
    fn default() -> Self {
        Self {
            max_buffer_size: 1 << 30,
            max_storage_binding_size: 128 << 20,
            max_push_constant_size: 128,
            supports_indirect_count: true,
            max_texture_array_layers: 256,
        }
    }
}

/// Inputs for a mesh pipeline's render state
pub struct RenderStateDescriptor<'a> {
    pub label: &'a str,
    pub shader: &'a ShaderBlob,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    pub color_format: wgpu::TextureFormat,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub topology: wgpu::PrimitiveTopology,
    pub blend: bool,
    pub cull_back_faces: bool,
    pub mode: DrawMode,
    /// Adds the texture array and sampler bindings
    pub textured: bool,
}

pub struct ComputeStateDescriptor<'a> {
    pub label: &'a str,
    pub shader: &'a ShaderBlob,
    pub entry_point: &'a str,
    pub indexed: bool,
}

/// Square RGBA8 texture array, one slice per layer
pub struct TextureArrayRequest<'a> {
    pub label: &'a str,
    pub size: u32,
    pub layers: &'a [&'a [u8]],
}

impl TextureArrayRequest<'_> {
    /// Bytes every layer must hold
    pub fn layer_bytes(&self) -> usize {
        self.size as usize * self.size as usize * 4
    }
}

/// Resources bound at group 0 of a mesh pipeline
pub struct MeshBindingResources<'a, B: GpuBackend + ?Sized> {
    pub camera: &'a B::Buffer,
    /// Present in GPU-indirect mode only
    pub instances: Option<&'a B::Buffer>,
    pub mesh_metadata: Option<&'a B::Buffer>,
    /// Required when the render state was created with `textured`
    pub textures: Option<&'a B::Texture>,
}

/// Buffers bound at group 0 of the cull pipeline
pub struct CullBindingResources<'a, B: GpuBackend + ?Sized> {
    pub uniforms: &'a B::Buffer,
    pub candidates: &'a B::Buffer,
    pub instances: &'a B::Buffer,
    pub commands: &'a B::Buffer,
    pub draw_count: &'a B::Buffer,
}

pub trait GpuBackend: Send + Sync + 'static {
    type Buffer: Send + Sync + 'static;
    /// Texture array with its view and sampler
    type Texture: Send + Sync + 'static;
    /// Marks a submission; waiting on it blocks until the GPU is done with it
    type Fence: Clone + Send + Sync + fmt::Debug + 'static;
    type RenderState: Send + Sync + 'static;
    type ComputeState: Send + Sync + 'static;
    type Bindings: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn limits(&self) -> BackendLimits;

    fn create_buffer(&self, request: &BufferRequest<'_>) -> Result<Self::Buffer, AllocationFailure>;

    /// Write into a host-visible buffer. Offset and length are 4-byte aligned.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    /// Host-visible transfer source already filled with `data`
    fn create_staging_buffer(
        &self,
        label: &str,
        data: &[u8],
    ) -> Result<Self::Buffer, AllocationFailure>;

    /// Submit a one-shot `src -> dst[dst_offset..]` copy
    fn submit_copy(
        &self,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        dst_offset: u64,
        size: u64,
    ) -> Self::Fence;

    fn wait(&self, fence: &Self::Fence);

    fn wait_idle(&self);

    fn destroy_buffer(&self, buffer: &Self::Buffer);

    /// Blocking diagnostic readback of one `u32`
    fn read_u32(&self, buffer: &Self::Buffer, offset: u64) -> EngineResult<u32>;

    fn create_texture_array(&self, request: &TextureArrayRequest<'_>) -> EngineResult<Self::Texture>;

    fn create_render_state(
        &self,
        desc: &RenderStateDescriptor<'_>,
    ) -> EngineResult<Self::RenderState>;

    fn create_compute_state(
        &self,
        desc: &ComputeStateDescriptor<'_>,
    ) -> EngineResult<Self::ComputeState>;

    fn create_mesh_bindings(
        &self,
        state: &Self::RenderState,
        resources: &MeshBindingResources<'_, Self>,
    ) -> EngineResult<Self::Bindings>;

    fn create_cull_bindings(
        &self,
        state: &Self::ComputeState,
        resources: &CullBindingResources<'_, Self>,
    ) -> EngineResult<Self::Bindings>;
}
