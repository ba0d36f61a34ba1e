//! GPU frustum culling for indirect pipelines
//!
//! Every registered mesh becomes one [`DrawCandidate`] in a host-visible
//! arena. Each frame the cull shader tests the owning instance's sphere and
//! appends the visible candidates, as indirect commands, to a command array
//! whose length lands in a one-word count buffer.

use super::batch_appender::RegisteredObject;
use crate::camera::FrustumPlanes;
use crate::constants::buffer_layouts::{CULL_UNIFORMS_SIZE, DRAW_CANDIDATE_SIZE, DRAW_COUNT_SIZE};
use crate::constants::culling::WORKGROUP_SIZE;
use crate::constants::shaders::{CULL_INDEXED_ENTRY, CULL_NON_INDEXED_ENTRY};
use crate::error::{gpu_operation_error, missing_prerequisite, EngineResult};
use crate::gpu::buffer_layouts::calculations::{candidate_capacity, indirect_buffer_size};
use crate::gpu::buffer_layouts::{CullUniforms, DrawCandidate};
use crate::gpu::{
    BufferRequest, BufferRole, ComputeRecorder, ComputeStateDescriptor, CullBindingResources, GpuBackend,
    MemoryTier, ShaderBlob,
};
use crate::memory::{ArenaUsage, BufferArena, DeviceMemoryBudget};
use std::sync::Arc;

/// Buffers the cull pass writes and the indirect draw reads
pub struct CullTargets<B: GpuBackend> {
    pub uniforms: B::Buffer,
    pub commands: B::Buffer,
    pub draw_count: B::Buffer,
    commands_size: u64,
    backend: Arc<B>,
}

impl<B: GpuBackend> CullTargets<B> {
    fn create(backend: Arc<B>, label: &str, max_candidates: u64, indexed: bool) -> EngineResult<Self> {
        let allocate = |suffix: &str, size: u64, role: BufferRole| {
            let label = format!("{} {}", label, suffix);
            backend
                .create_buffer(&BufferRequest {
                    label: &label,
                    size,
                    role,
                    tier: MemoryTier::DeviceLocal,
                })
                .map_err(|failure| gpu_operation_error(&format!("allocate '{}'", label), failure))
        };

        let commands_size = indirect_buffer_size(max_candidates, indexed);
        let uniforms = allocate("cull uniforms", CULL_UNIFORMS_SIZE, BufferRole::Uniform)?;
        let commands = allocate("indirect commands", commands_size, BufferRole::Indirect)?;
        let draw_count = allocate("draw count", DRAW_COUNT_SIZE, BufferRole::DrawCount)?;

        Ok(Self {
            uniforms,
            commands,
            draw_count,
            commands_size,
            backend,
        })
    }
}

impl<B: GpuBackend> Drop for CullTargets<B> {
    fn drop(&mut self) {
        self.backend.destroy_buffer(&self.uniforms);
        self.backend.destroy_buffer(&self.commands);
        self.backend.destroy_buffer(&self.draw_count);
    }
}

/// Compute pipeline and bindings; rebuilt with the rest of a pipeline's GPU state
pub struct CullPipelineState<B: GpuBackend> {
    pub state: B::ComputeState,
    pub bindings: B::Bindings,
}

/// Everything a frame needs to record the cull pass, detached from the stage
pub struct CullFrame<B: GpuBackend> {
    targets: Arc<CullTargets<B>>,
    candidate_count: u32,
    indexed: bool,
}

impl<B: GpuBackend> Clone for CullFrame<B> {
    fn clone(&self) -> Self {
        Self {
            targets: self.targets.clone(),
            candidate_count: self.candidate_count,
            indexed: self.indexed,
        }
    }
}

impl<B: GpuBackend> CullFrame<B> {
    /// Write the uniforms, zero the draw count and dispatch one invocation per
    /// candidate. The dispatch is skipped when there are no candidates.
    pub fn compute<R>(&self, recorder: &mut R, frustum: &FrustumPlanes, gpu: &CullPipelineState<B>)
    where
        R: ComputeRecorder<B> + ?Sized,
    {
        let uniforms = CullUniforms::new(frustum, self.candidate_count, self.indexed);
        self.targets
            .backend
            .write_buffer(&self.targets.uniforms, 0, bytemuck::bytes_of(&uniforms));
        recorder.clear_buffer(&self.targets.draw_count);

        if self.candidate_count == 0 {
            return;
        }
        recorder.dispatch(&gpu.state, &gpu.bindings, workgroup_count(self.candidate_count));
    }

    pub fn commands(&self) -> &B::Buffer {
        &self.targets.commands
    }

    pub fn draw_count(&self) -> &B::Buffer {
        &self.targets.draw_count
    }

    /// Upper bound for the indirect draw: one command per candidate
    pub fn max_draw_count(&self) -> u32 {
        self.candidate_count
    }

    pub fn indexed(&self) -> bool {
        self.indexed
    }
}

pub fn workgroup_count(candidates: u32) -> u32 {
    candidates.div_ceil(WORKGROUP_SIZE)
}

pub struct CullingStage<B: GpuBackend> {
    label: String,
    indexed: bool,
    candidates: BufferArena<B>,
    targets: Arc<CullTargets<B>>,
    /// Objects already turned into candidates
    cursor: usize,
    candidate_count: u32,
}

impl<B: GpuBackend> CullingStage<B> {
    /// `compute_space` bytes of candidates; the command array is sized to match
    pub fn new(
        backend: Arc<B>,
        budget: Arc<DeviceMemoryBudget>,
        label: &str,
        compute_space: u64,
        indexed: bool,
    ) -> EngineResult<Self> {
        let candidates = BufferArena::create(
            backend.clone(),
            budget,
            format!("{} candidates", label),
            BufferRole::Storage,
            compute_space,
            false,
        )?;
        let targets = CullTargets::create(backend, label, candidate_capacity(compute_space), indexed)?;

        log::info!(
            "[CullingStage::new] '{}' holds up to {} candidates",
            label,
            candidate_capacity(compute_space)
        );
        Ok(Self {
            label: label.to_string(),
            indexed,
            candidates,
            targets: Arc::new(targets),
            cursor: 0,
            candidate_count: 0,
        })
    }

    /// Emit candidates for the objects registered since the last call.
    ///
    /// Objects are taken in order while their candidates fit; the cursor stops
    /// at the first object that does not. Returns the number of new candidates.
    pub fn update(&mut self, objects: &[RegisteredObject]) -> u32 {
        if self.cursor >= objects.len() {
            return 0;
        }

        let pending = &objects[self.cursor..];
        let mut candidates = Vec::new();
        let mut taken = 0;
        for object in pending {
            let needed = (candidates.len() + object.meshes.len()) as u64 * DRAW_CANDIDATE_SIZE;
            if needed > self.candidates.remaining() {
                break;
            }
            candidates.extend(self.candidates_for(object));
            taken += 1;
        }

        if taken < pending.len() {
            log::warn!(
                "[CullingStage::update] '{}': {} of {} pending objects fit in the candidate arena",
                self.label,
                taken,
                pending.len()
            );
        }
        if taken == 0 || !self.candidates.append(bytemuck::cast_slice(&candidates)) {
            return 0;
        }

        self.cursor += taken;
        self.candidate_count = (self.candidates.content_size() / DRAW_CANDIDATE_SIZE) as u32;
        log::debug!(
            "[CullingStage::update] '{}': {} candidates ({} new)",
            self.label,
            self.candidate_count,
            candidates.len()
        );
        candidates.len() as u32
    }

    fn candidates_for<'o>(&self, object: &'o RegisteredObject) -> impl Iterator<Item = DrawCandidate> + 'o {
        let indexed = self.indexed;
        object.meshes.iter().enumerate().map(move |(i, mesh)| {
            let mesh_id = object.first_mesh + i as u32;
            if indexed {
                DrawCandidate::indexed(
                    mesh.index_count,
                    mesh.index_offset,
                    mesh.vertex_offset as i32,
                    mesh_id,
                    object.instance_id,
                )
            } else {
                DrawCandidate::non_indexed(mesh.vertex_count, mesh.vertex_offset, mesh_id, object.instance_id)
            }
        })
    }

    /// Candidate bytes still free once every object in `objects` past the
    /// cursor has been emitted
    pub fn free_space(&self, objects: &[RegisteredObject]) -> u64 {
        let pending: u64 = objects
            .iter()
            .skip(self.cursor)
            .map(|object| object.meshes.len() as u64 * DRAW_CANDIDATE_SIZE)
            .sum();
        self.candidates.remaining().saturating_sub(pending)
    }

    pub fn compute<R>(&self, recorder: &mut R, frustum: &FrustumPlanes, gpu: &CullPipelineState<B>)
    where
        R: ComputeRecorder<B> + ?Sized,
    {
        self.frame().compute(recorder, frustum, gpu);
    }

    /// Detached view for recording outside the pipeline lock
    pub fn frame(&self) -> CullFrame<B> {
        CullFrame {
            targets: self.targets.clone(),
            candidate_count: self.candidate_count,
            indexed: self.indexed,
        }
    }

    /// Build the cull compute pipeline against `instances`
    pub fn create_gpu_state(
        &self,
        backend: &B,
        shader: &ShaderBlob,
        instances: &B::Buffer,
    ) -> EngineResult<CullPipelineState<B>> {
        let Some(candidates) = self.candidates.buffer() else {
            return Err(missing_prerequisite(format!(
                "candidate arena of '{}'",
                self.label
            )));
        };

        let label = format!("{} cull", self.label);
        let state = backend.create_compute_state(&ComputeStateDescriptor {
            label: &label,
            shader,
            entry_point: if self.indexed {
                CULL_INDEXED_ENTRY
            } else {
                CULL_NON_INDEXED_ENTRY
            },
            indexed: self.indexed,
        })?;
        let bindings = backend.create_cull_bindings(
            &state,
            &CullBindingResources {
                uniforms: &self.targets.uniforms,
                candidates,
                instances,
                commands: &self.targets.commands,
                draw_count: &self.targets.draw_count,
            },
        )?;
        Ok(CullPipelineState { state, bindings })
    }

    /// Blocking readback of the last dispatch's visible count
    pub fn read_visible_count(&self, backend: &B) -> EngineResult<u32> {
        backend.read_u32(&self.targets.draw_count, 0)
    }

    /// Drop all candidates; used by `clear_objects`
    pub fn reset(&mut self) {
        self.candidates.reset();
        self.cursor = 0;
        self.candidate_count = 0;
    }

    pub fn candidate_count(&self) -> u32 {
        self.candidate_count
    }

    pub fn max_draw_count(&self) -> u32 {
        self.candidate_count
    }

    pub fn usage(&self) -> Vec<ArenaUsage> {
        vec![
            self.candidates.usage(),
            ArenaUsage {
                label: format!("{} indirect commands", self.label),
                capacity: self.targets.commands_size,
                used: self.candidate_count as u64
                    * indirect_buffer_size(1, self.indexed),
                tier: MemoryTier::DeviceLocal,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessBackend;
    use crate::renderer::MeshRange;
    use crate::scene::{MaterialRef, Renderable};

    #[test]
    fn test_workgroup_count_rounds_up() {
        assert_eq!(workgroup_count(0), 0);
        assert_eq!(workgroup_count(1), 1);
        assert_eq!(workgroup_count(32), 1);
        assert_eq!(workgroup_count(33), 2);
        assert_eq!(workgroup_count(1000), 32);
    }

    #[test]
    fn test_command_array_matches_candidate_space() {
        let backend = Arc::new(HeadlessBackend::new());
        let stage = CullingStage::new(
            backend,
            Arc::new(DeviceMemoryBudget::new(0)),
            "props",
            64 * DRAW_CANDIDATE_SIZE,
            true,
        )
        .expect("stage");

        let usage = stage.usage();
        assert_eq!(usage[0].capacity, 64 * DRAW_CANDIDATE_SIZE);
        assert_eq!(usage[1].capacity, 64 * 20);
        assert_eq!(stage.max_draw_count(), 0);
    }

    fn registered(name: &str, instance_id: u32, meshes: u32) -> RegisteredObject {
        RegisteredObject {
            source: Arc::new(Renderable::new(name, Vec::new())),
            instance_id,
            first_mesh: instance_id,
            meshes: (0..meshes)
                .map(|i| MeshRange {
                    vertex_offset: 3 * (instance_id + i),
                    vertex_count: 3,
                    index_offset: 0,
                    index_count: 0,
                    material: MaterialRef::default(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_update_keeps_the_candidates_that_fit() {
        let backend = Arc::new(HeadlessBackend::new());
        let mut stage = CullingStage::new(
            backend,
            Arc::new(DeviceMemoryBudget::new(0)),
            "props",
            2 * DRAW_CANDIDATE_SIZE,
            false,
        )
        .expect("stage");

        let mut objects = vec![registered("a", 0, 1)];
        assert_eq!(stage.update(&objects), 1);
        assert_eq!(stage.free_space(&objects), DRAW_CANDIDATE_SIZE);

        // "b" fills the last slot, "c" waits
        objects.push(registered("b", 1, 1));
        objects.push(registered("c", 2, 1));
        assert_eq!(stage.free_space(&objects), 0);
        assert_eq!(stage.update(&objects), 1);
        assert_eq!(stage.candidate_count(), 2);
        assert_eq!(stage.update(&objects), 0);

        stage.reset();
        assert_eq!(stage.update(&objects), 2);
    }
}
