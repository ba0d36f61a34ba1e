//! In-memory backend
//!
//! Buffers are plain byte vectors, submissions complete immediately and the
//! cull dispatch is emulated on the CPU with the same sphere test the direct
//! draw path uses. Workgroups are processed last-to-first so nothing
//! downstream can come to rely on the order of the culled command array.
//!
//! Optional capacity limits make it possible to provoke device-local
//! exhaustion and host allocation failure deterministically.

use super::backend::*;
use super::buffer_layouts::{
    CullUniforms, DirectPushConstants, DrawCandidate, InstanceRecord,
};
use super::recorder::{ComputeRecorder, DrawRecorder};
use super::shader::ShaderBlob;
use crate::config::DrawMode;
use crate::constants::buffer_layouts::*;
use crate::constants::culling::WORKGROUP_SIZE;
use crate::error::{gpu_operation_error, missing_prerequisite, pipeline_creation_error, EngineResult};
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Byte-vector buffer; clones share storage
#[derive(Clone, Debug)]
pub struct HeadlessBuffer {
    label: String,
    role: BufferRole,
    tier: MemoryTier,
    storage: Arc<Mutex<Vec<u8>>>,
    destroyed: Arc<AtomicBool>,
}

impl HeadlessBuffer {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn role(&self) -> BufferRole {
        self.role
    }

    pub fn tier(&self) -> MemoryTier {
        self.tier
    }

    pub fn size(&self) -> u64 {
        self.storage.lock().len() as u64
    }

    pub fn contents(&self) -> Vec<u8> {
        self.storage.lock().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn read<T: bytemuck::Pod>(&self, offset: usize) -> Option<T> {
        let data = self.storage.lock();
        let end = offset + std::mem::size_of::<T>();
        (end <= data.len()).then(|| bytemuck::pod_read_unaligned(&data[offset..end]))
    }

    fn write(&self, offset: usize, bytes: &[u8]) -> bool {
        let mut data = self.storage.lock();
        let end = offset + bytes.len();
        if end > data.len() {
            return false;
        }
        data[offset..end].copy_from_slice(bytes);
        true
    }
}

/// Counters for assertions in tests
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub host_writes: u64,
    pub staging_copies: u64,
    pub fence_waits: u64,
    pub idle_waits: u64,
    pub dispatches: u64,
    pub textures_created: u64,
}

/// Texture array kept as one byte vector per layer
#[derive(Clone, Debug)]
pub struct HeadlessTexture {
    pub label: String,
    pub size: u32,
    pub layers: Vec<Vec<u8>>,
}

impl HeadlessTexture {
    pub fn layer_count(&self) -> u32 {
        self.layers.len() as u32
    }
}

#[derive(Debug)]
pub struct HeadlessRenderState {
    pub label: String,
    pub mode: DrawMode,
    pub textured: bool,
}

#[derive(Debug)]
pub struct HeadlessComputeState {
    pub label: String,
    pub indexed: bool,
}

#[derive(Debug)]
pub enum HeadlessBindings {
    Mesh {
        camera: HeadlessBuffer,
        textures: Option<HeadlessTexture>,
    },
    Cull {
        uniforms: HeadlessBuffer,
        candidates: HeadlessBuffer,
        instances: HeadlessBuffer,
        commands: HeadlessBuffer,
        draw_count: HeadlessBuffer,
    },
}

#[derive(Default)]
pub struct HeadlessBackend {
    limits: BackendLimits,
    device_local_capacity: Option<u64>,
    host_capacity: Option<u64>,
    device_local_used: AtomicU64,
    host_used: AtomicU64,
    next_fence: AtomicU64,
    stats: Mutex<HeadlessStats>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: BackendLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Device-local allocations beyond `bytes` report out-of-memory
    pub fn with_device_local_capacity(mut self, bytes: u64) -> Self {
        self.device_local_capacity = Some(bytes);
        self
    }

    /// Host-visible allocations beyond `bytes` are rejected
    pub fn with_host_capacity(mut self, bytes: u64) -> Self {
        self.host_capacity = Some(bytes);
        self
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats.lock().clone()
    }

    pub fn device_local_in_use(&self) -> u64 {
        self.device_local_used.load(Ordering::Acquire)
    }

    fn reserve(counter: &AtomicU64, capacity: Option<u64>, size: u64) -> bool {
        let Some(capacity) = capacity else {
            counter.fetch_add(size, Ordering::AcqRel);
            return true;
        };
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|&total| total <= capacity)
            })
            .is_ok()
    }

    fn next_fence(&self) -> u64 {
        self.next_fence.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Fence for a frame submission; completes immediately like everything else
    pub fn signal(&self) -> u64 {
        self.next_fence()
    }

    /// CPU rendition of cull_indexed / cull_non_indexed
    fn emulate_cull(&self, state: &HeadlessComputeState, bindings: &HeadlessBindings, workgroups: u32) {
        let HeadlessBindings::Cull {
            uniforms,
            candidates,
            instances,
            commands,
            draw_count,
        } = bindings
        else {
            log::error!("[HeadlessBackend::dispatch] '{}' bound without cull bindings", state.label);
            return;
        };

        let Some(params) = uniforms.read::<CullUniforms>(0) else {
            log::error!("[HeadlessBackend::dispatch] Cull uniforms are too small");
            return;
        };
        let frustum = params.frustum();
        let mut visible = draw_count.read::<u32>(0).unwrap_or(0);

        for group in (0..workgroups).rev() {
            for local in 0..WORKGROUP_SIZE {
                let index = group * WORKGROUP_SIZE + local;
                if index >= params.candidate_count {
                    continue;
                }
                let Some(candidate) =
                    candidates.read::<DrawCandidate>((index as u64 * DRAW_CANDIDATE_SIZE) as usize)
                else {
                    continue;
                };
                let Some(instance) = instances.read::<InstanceRecord>(
                    (candidate.instance_id as u64 * INSTANCE_RECORD_SIZE) as usize,
                ) else {
                    continue;
                };
                if !frustum.intersects_sphere(&instance.sphere()) {
                    continue;
                }

                let written = if state.indexed {
                    commands.write(
                        (visible as u64 * INDIRECT_DRAW_INDEXED_SIZE) as usize,
                        bytemuck::bytes_of(&candidate.to_indexed_command()),
                    )
                } else {
                    commands.write(
                        (visible as u64 * INDIRECT_DRAW_SIZE) as usize,
                        bytemuck::bytes_of(&candidate.to_command()),
                    )
                };
                if written {
                    visible += 1;
                }
            }
        }

        draw_count.write(0, bytemuck::bytes_of(&visible));
        self.stats.lock().dispatches += 1;
    }
}

impl GpuBackend for HeadlessBackend {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type Fence = u64;
    type RenderState = HeadlessRenderState;
    type ComputeState = HeadlessComputeState;
    type Bindings = HeadlessBindings;

    fn name(&self) -> &'static str {
        "headless"
    }

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn create_buffer(&self, request: &BufferRequest<'_>) -> Result<HeadlessBuffer, AllocationFailure> {
        match request.tier {
            MemoryTier::DeviceLocal => {
                if !Self::reserve(&self.device_local_used, self.device_local_capacity, request.size) {
                    return Err(AllocationFailure::OutOfMemory);
                }
            }
            MemoryTier::HostVisible => {
                if !Self::reserve(&self.host_used, self.host_capacity, request.size) {
                    return Err(AllocationFailure::Rejected(format!(
                        "host capacity exhausted by '{}'",
                        request.label
                    )));
                }
            }
        }

        self.stats.lock().buffers_created += 1;
        Ok(HeadlessBuffer {
            label: request.label.to_string(),
            role: request.role,
            tier: request.tier,
            storage: Arc::new(Mutex::new(vec![0; request.size as usize])),
            destroyed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) {
        if !buffer.write(offset as usize, data) {
            log::error!(
                "[HeadlessBackend::write_buffer] Write of {} bytes at {} overruns '{}'",
                data.len(),
                offset,
                buffer.label
            );
            return;
        }
        self.stats.lock().host_writes += 1;
    }

    fn create_staging_buffer(&self, label: &str, data: &[u8]) -> Result<HeadlessBuffer, AllocationFailure> {
        if let Some(capacity) = self.host_capacity {
            if self.host_used.load(Ordering::Acquire) + data.len() as u64 > capacity {
                return Err(AllocationFailure::OutOfMemory);
            }
        }
        Ok(HeadlessBuffer {
            label: label.to_string(),
            role: BufferRole::Staging,
            tier: MemoryTier::HostVisible,
            storage: Arc::new(Mutex::new(data.to_vec())),
            destroyed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn submit_copy(&self, src: &HeadlessBuffer, dst: &HeadlessBuffer, dst_offset: u64, size: u64) -> u64 {
        let bytes = {
            let data = src.storage.lock();
            data[..(size as usize).min(data.len())].to_vec()
        };
        if !dst.write(dst_offset as usize, &bytes) {
            log::error!(
                "[HeadlessBackend::submit_copy] Copy of {} bytes at {} overruns '{}'",
                size,
                dst_offset,
                dst.label
            );
        }
        self.stats.lock().staging_copies += 1;
        self.next_fence()
    }

    fn wait(&self, _fence: &u64) {
        self.stats.lock().fence_waits += 1;
    }

    fn wait_idle(&self) {
        self.stats.lock().idle_waits += 1;
    }

    fn destroy_buffer(&self, buffer: &HeadlessBuffer) {
        if buffer.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let size = buffer.size();
        let counter = match buffer.tier {
            MemoryTier::DeviceLocal => &self.device_local_used,
            MemoryTier::HostVisible => &self.host_used,
        };
        if buffer.role != BufferRole::Staging {
            let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(size))
            });
        }
        self.stats.lock().buffers_destroyed += 1;
    }

    fn read_u32(&self, buffer: &HeadlessBuffer, offset: u64) -> EngineResult<u32> {
        buffer
            .read::<u32>(offset as usize)
            .ok_or_else(|| missing_prerequisite(format!("4 readable bytes at {} in '{}'", offset, buffer.label)))
    }

    fn create_texture_array(&self, request: &TextureArrayRequest<'_>) -> EngineResult<HeadlessTexture> {
        let layers = request.layers.len() as u32;
        if layers == 0 || layers > self.limits.max_texture_array_layers {
            return Err(gpu_operation_error(
                "create_texture_array",
                format!(
                    "'{}' has {} layers, device allows 1..={}",
                    request.label, layers, self.limits.max_texture_array_layers
                ),
            ));
        }
        if let Some(layer) = request.layers.iter().position(|l| l.len() != request.layer_bytes()) {
            return Err(gpu_operation_error(
                "create_texture_array",
                format!("layer {} of '{}' is not {} bytes", layer, request.label, request.layer_bytes()),
            ));
        }

        self.stats.lock().textures_created += 1;
        Ok(HeadlessTexture {
            label: request.label.to_string(),
            size: request.size,
            layers: request.layers.iter().map(|l| l.to_vec()).collect(),
        })
    }

    fn create_render_state(&self, desc: &RenderStateDescriptor<'_>) -> EngineResult<HeadlessRenderState> {
        check_entry(desc.shader, desc.vertex_entry, desc.label)?;
        check_entry(desc.shader, desc.fragment_entry, desc.label)?;
        if desc.mode == DrawMode::Direct
            && self.limits.max_push_constant_size < DIRECT_PUSH_CONSTANTS_SIZE
        {
            return Err(pipeline_creation_error(
                desc.label,
                format!(
                    "direct mode needs {} bytes of push constants, device offers {}",
                    DIRECT_PUSH_CONSTANTS_SIZE, self.limits.max_push_constant_size
                ),
            ));
        }
        Ok(HeadlessRenderState {
            label: desc.label.to_string(),
            mode: desc.mode,
            textured: desc.textured,
        })
    }

    fn create_compute_state(&self, desc: &ComputeStateDescriptor<'_>) -> EngineResult<HeadlessComputeState> {
        check_entry(desc.shader, desc.entry_point, desc.label)?;
        Ok(HeadlessComputeState {
            label: desc.label.to_string(),
            indexed: desc.indexed,
        })
    }

    fn create_mesh_bindings(
        &self,
        state: &HeadlessRenderState,
        resources: &MeshBindingResources<'_, Self>,
    ) -> EngineResult<HeadlessBindings> {
        if state.textured && resources.textures.is_none() {
            return Err(missing_prerequisite(format!("texture array for '{}'", state.label)));
        }
        Ok(HeadlessBindings::Mesh {
            camera: resources.camera.clone(),
            textures: resources.textures.cloned(),
        })
    }

    fn create_cull_bindings(
        &self,
        _state: &HeadlessComputeState,
        resources: &CullBindingResources<'_, Self>,
    ) -> EngineResult<HeadlessBindings> {
        Ok(HeadlessBindings::Cull {
            uniforms: resources.uniforms.clone(),
            candidates: resources.candidates.clone(),
            instances: resources.instances.clone(),
            commands: resources.commands.clone(),
            draw_count: resources.draw_count.clone(),
        })
    }
}

fn check_entry(shader: &ShaderBlob, entry: &str, label: &str) -> EngineResult<()> {
    if shader.declares_entry_point(entry) {
        Ok(())
    } else {
        Err(pipeline_creation_error(
            label,
            format!("'{}' has no entry point '{}'", shader.name, entry),
        ))
    }
}

/// Compute recorder that executes work immediately
pub struct HeadlessEncoder<'b> {
    backend: &'b HeadlessBackend,
}

impl<'b> HeadlessEncoder<'b> {
    pub fn new(backend: &'b HeadlessBackend) -> Self {
        Self { backend }
    }
}

impl ComputeRecorder<HeadlessBackend> for HeadlessEncoder<'_> {
    fn clear_buffer(&mut self, buffer: &HeadlessBuffer) {
        buffer.storage.lock().iter_mut().for_each(|b| *b = 0);
    }

    fn dispatch(&mut self, state: &HeadlessComputeState, bindings: &HeadlessBindings, workgroups: u32) {
        self.backend.emulate_cull(state, bindings, workgroups);
    }
}

/// One command captured by [`RecordingPass`]
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    BindPipeline { label: String },
    SetVertexBuffer { label: String, size: u64 },
    SetIndexBuffer { label: String, size: u64 },
    PushConstants(Vec<u8>),
    Draw { vertices: Range<u32>, instances: Range<u32> },
    DrawIndexed { indices: Range<u32>, base_vertex: i32, instances: Range<u32> },
    /// `visible` is the count buffer's value when the draw was recorded
    DrawIndirectCount { max_count: u32, indexed: bool, visible: u32 },
}

impl RecordedCommand {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            RecordedCommand::Draw { .. }
                | RecordedCommand::DrawIndexed { .. }
                | RecordedCommand::DrawIndirectCount { .. }
        )
    }
}

/// Draw recorder that keeps the command stream for inspection
#[derive(Debug, Default)]
pub struct RecordingPass {
    pub commands: Vec<RecordedCommand>,
}

impl RecordingPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw_calls(&self) -> Vec<&RecordedCommand> {
        self.commands.iter().filter(|c| c.is_draw()).collect()
    }

    /// Push constant payloads decoded in recording order
    pub fn push_constants(&self) -> Vec<DirectPushConstants> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::PushConstants(bytes) => {
                    Some(bytemuck::pod_read_unaligned::<DirectPushConstants>(bytes))
                }
                _ => None,
            })
            .collect()
    }
}

impl<'a> DrawRecorder<'a, HeadlessBackend> for RecordingPass {
    fn bind_pipeline(&mut self, state: &'a HeadlessRenderState, _bindings: &'a HeadlessBindings) {
        self.commands.push(RecordedCommand::BindPipeline {
            label: state.label.clone(),
        });
    }

    fn set_vertex_buffer(&mut self, buffer: &'a HeadlessBuffer, size: u64) {
        self.commands.push(RecordedCommand::SetVertexBuffer {
            label: buffer.label.clone(),
            size,
        });
    }

    fn set_index_buffer(&mut self, buffer: &'a HeadlessBuffer, size: u64) {
        self.commands.push(RecordedCommand::SetIndexBuffer {
            label: buffer.label.clone(),
            size,
        });
    }

    fn set_push_constants(&mut self, data: &[u8]) {
        self.commands.push(RecordedCommand::PushConstants(data.to_vec()));
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.commands.push(RecordedCommand::Draw { vertices, instances });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.commands.push(RecordedCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn draw_indirect_count(
        &mut self,
        _commands: &'a HeadlessBuffer,
        count: &'a HeadlessBuffer,
        max_count: u32,
        indexed: bool,
    ) {
        let visible = count.read::<u32>(0).unwrap_or(0);
        self.commands.push(RecordedCommand::DrawIndirectCount {
            max_count,
            indexed,
            visible,
        });
    }
}
