//! Mesh pipelines
//!
//! A [`MeshPipeline`] owns the arenas for one kind of mesh, the objects
//! registered into them and, in GPU-indirect mode, a [`CullingStage`]. All
//! mutable state sits behind one mutex so worker threads can add objects while
//! the render thread draws from a [`DrawSnapshot`] taken at frame start.

use super::batch_appender::{BatchArenas, RegisteredObject, RenderBatchOffsets, RenderableBatchAppender};
use super::culling::{CullFrame, CullPipelineState, CullingStage};
use super::draw_dispatcher::{DrawDispatcher, DrawStats};
use super::target::TargetFormats;
use crate::camera::FrustumPlanes;
use crate::config::{DrawMode, MeshKind, PipelineConfig, ResolvedPipeline};
use crate::constants::shaders::{FRAGMENT_ENTRY, VERTEX_ENTRY, VERTEX_INDIRECT_ENTRY};
use crate::error::{missing_prerequisite, pipeline_creation_error, EngineResult};
use crate::gpu::buffer_layouts::calculations::instance_offset;
use crate::gpu::buffer_layouts::InstanceRecord;
use crate::gpu::{
    BufferRole, DrawRecorder, GpuBackend, MeshBindingResources, RenderStateDescriptor, ShaderLibrary,
    TextureArrayRequest,
};
use crate::memory::{BufferArena, DeviceMemoryBudget, MemoryUsage};
use crate::scene::{MeshSource, TextureImage, TextureRegistry};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Render pipeline, mesh bindings and the optional cull pipeline
pub struct PipelineGpuState<B: GpuBackend> {
    pub render_state: B::RenderState,
    pub bindings: B::Bindings,
    /// Texture array bound by `texture_mesh` pipelines
    pub textures: Option<B::Texture>,
    pub cull: Option<CullPipelineState<B>>,
}

/// Bound range of an arena at snapshot time
pub struct ArenaView<B: GpuBackend> {
    pub buffer: Arc<B::Buffer>,
    pub size: u64,
}

impl<B: GpuBackend> ArenaView<B> {
    fn of(arena: &BufferArena<B>) -> Option<Self> {
        arena.buffer().map(|buffer| Self {
            buffer: buffer.clone(),
            size: arena.content_size(),
        })
    }
}

/// Everything the render thread needs from a pipeline for one frame
pub struct DrawSnapshot<B: GpuBackend> {
    pub pipeline: String,
    pub dispatcher: DrawDispatcher,
    pub gpu: Arc<PipelineGpuState<B>>,
    pub vertices: Option<ArenaView<B>>,
    pub indices: Option<ArenaView<B>>,
    pub objects: Arc<Vec<RegisteredObject>>,
    pub cull: Option<CullFrame<B>>,
}

impl<B: GpuBackend> DrawSnapshot<B> {
    pub fn record_compute<R>(&self, recorder: &mut R, frustum: &FrustumPlanes)
    where
        R: crate::gpu::ComputeRecorder<B> + ?Sized,
    {
        if let (Some(frame), Some(gpu)) = (&self.cull, &self.gpu.cull) {
            frame.compute(recorder, frustum, gpu);
        }
    }

    pub fn draw<'a, R>(&'a self, pass: &mut R, frustum: &FrustumPlanes) -> DrawStats
    where
        R: DrawRecorder<'a, B> + ?Sized,
    {
        self.dispatcher.draw(pass, self, frustum)
    }
}

struct PipelineArenas<B: GpuBackend> {
    vertices: BufferArena<B>,
    indices: Option<BufferArena<B>>,
    instances: Option<BufferArena<B>>,
    meshes: Option<BufferArena<B>>,
}

struct PipelineInner<B: GpuBackend> {
    arenas: PipelineArenas<B>,
    offsets: RenderBatchOffsets,
    objects: Arc<Vec<RegisteredObject>>,
    culling: Option<CullingStage<B>>,
    gpu: Option<Arc<PipelineGpuState<B>>>,
    formats: TargetFormats,
    /// Registry revision the texture array was last built from
    texture_revision: u64,
}

pub struct MeshPipeline<B: GpuBackend> {
    name: String,
    resolved: ResolvedPipeline,
    backend: Arc<B>,
    shaders: ShaderLibrary,
    camera: Arc<B::Buffer>,
    textures: Arc<TextureRegistry>,
    appender: RenderableBatchAppender,
    dispatcher: DrawDispatcher,
    enabled: AtomicBool,
    inner: Mutex<PipelineInner<B>>,
}

impl<B: GpuBackend> MeshPipeline<B> {
    /// Allocate the arenas and try to build the GPU state.
    ///
    /// Arena failures are returned. A GPU state failure is logged and leaves
    /// the pipeline non-ready until [`MeshPipeline::rebuild_gpu_state`]
    /// succeeds.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        config: &PipelineConfig,
        backend: Arc<B>,
        budget: Arc<DeviceMemoryBudget>,
        shaders: ShaderLibrary,
        camera: Arc<B::Buffer>,
        textures: Arc<TextureRegistry>,
        formats: TargetFormats,
        parallel_cull_threshold: usize,
    ) -> EngineResult<Self> {
        let name = name.into();
        let resolved = config.resolve();
        let mesh = &resolved.mesh;
        let gpu_driven = mesh.draw_mode == DrawMode::GpuIndirect;

        let arena = |suffix: &str, role: BufferRole, capacity: u64, device_local: bool| {
            BufferArena::create(
                backend.clone(),
                budget.clone(),
                format!("{} {}", name, suffix),
                role,
                capacity,
                device_local,
            )
        };

        let vertices = arena(
            "vertices",
            BufferRole::Vertex,
            mesh.reserved_vertex_space,
            mesh.device_local_vertex_space,
        )?;
        let indices = if resolved.indexed {
            Some(arena(
                "indices",
                BufferRole::Index,
                mesh.reserved_index_space,
                mesh.device_local_index_space,
            )?)
        } else {
            None
        };

        let (instances, meshes, culling) = if gpu_driven {
            let instances = arena("instances", BufferRole::Storage, mesh.reserved_instance_space, false)?;
            let meshes = arena("mesh metadata", BufferRole::Storage, mesh.reserved_mesh_space, false)?;
            let culling = CullingStage::new(
                backend.clone(),
                budget.clone(),
                &name,
                mesh.reserved_compute_space,
                resolved.indexed,
            )?;
            (Some(instances), Some(meshes), Some(culling))
        } else {
            (None, None, None)
        };

        let pipeline = Self {
            appender: RenderableBatchAppender::new(resolved.indexed, gpu_driven),
            dispatcher: DrawDispatcher::new(mesh.draw_mode, resolved.indexed, parallel_cull_threshold),
            enabled: AtomicBool::new(mesh.enabled),
            inner: Mutex::new(PipelineInner {
                arenas: PipelineArenas {
                    vertices,
                    indices,
                    instances,
                    meshes,
                },
                offsets: RenderBatchOffsets::default(),
                objects: Arc::new(Vec::new()),
                culling,
                gpu: None,
                formats,
                texture_revision: 0,
            }),
            name,
            resolved,
            backend,
            shaders,
            camera,
            textures,
        };

        if let Err(error) = pipeline.rebuild_gpu_state(formats) {
            log::error!("[MeshPipeline::new] '{}' is not ready: {}", pipeline.name, error);
        } else {
            log::info!(
                "[MeshPipeline::new] '{}' ready ({:?}, {:?})",
                pipeline.name,
                pipeline.resolved.kind,
                pipeline.resolved.mesh.draw_mode
            );
        }
        Ok(pipeline)
    }

    /// Recreate render and cull state for `formats`; arenas are untouched
    pub fn rebuild_gpu_state(&self, formats: TargetFormats) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        self.rebuild_locked(&mut inner, formats)
    }

    fn rebuild_locked(&self, inner: &mut PipelineInner<B>, formats: TargetFormats) -> EngineResult<()> {
        inner.gpu = None;
        inner.formats = formats;
        inner.texture_revision = self.textures.revision();
        let state = self.build_gpu_state(inner, formats)?;
        inner.gpu = Some(Arc::new(state));
        Ok(())
    }

    fn is_textured(&self) -> bool {
        self.resolved.kind == MeshKind::Texture
    }

    /// One layer per registered image, or a single white layer when none are
    fn build_texture_array(&self) -> EngineResult<B::Texture> {
        let size = self.textures.layer_size();
        let mut images = self.textures.images();
        if images.is_empty() {
            images.push(Arc::new(TextureImage::solid("fallback", size, [255; 4])));
        }
        let layers: Vec<&[u8]> = images.iter().map(|image| image.rgba.as_slice()).collect();
        let label = format!("{} textures", self.name);
        self.backend.create_texture_array(&TextureArrayRequest {
            label: &label,
            size,
            layers: &layers,
        })
    }

    fn build_gpu_state(&self, inner: &PipelineInner<B>, formats: TargetFormats) -> EngineResult<PipelineGpuState<B>> {
        let mode = self.resolved.mesh.draw_mode;
        if mode == DrawMode::GpuIndirect && !self.backend.limits().supports_indirect_count {
            return Err(pipeline_creation_error(
                &self.name,
                "GPU-indirect mode needs indirect-count draws, which the device does not support",
            ));
        }

        let shader = self.shaders.load(&self.resolved.shader)?;
        let render_state = self.backend.create_render_state(&RenderStateDescriptor {
            label: &self.name,
            shader: &shader,
            vertex_entry: match mode {
                DrawMode::Direct => VERTEX_ENTRY,
                DrawMode::GpuIndirect => VERTEX_INDIRECT_ENTRY,
            },
            fragment_entry: FRAGMENT_ENTRY,
            color_format: formats.color,
            depth_format: if self.resolved.mesh.depth_test { formats.depth } else { None },
            topology: self.resolved.mesh.topology.to_wgpu(),
            blend: self.resolved.mesh.color_blend,
            cull_back_faces: self.resolved.mesh.cull_back_faces,
            mode,
            textured: self.is_textured(),
        })?;

        let textures = if self.is_textured() {
            Some(self.build_texture_array()?)
        } else {
            None
        };

        let instances = inner.arenas.instances.as_ref().and_then(|a| a.buffer());
        let meshes = inner.arenas.meshes.as_ref().and_then(|a| a.buffer());
        let bindings = self.backend.create_mesh_bindings(
            &render_state,
            &MeshBindingResources {
                camera: &self.camera,
                instances: instances.map(|b| &**b),
                mesh_metadata: meshes.map(|b| &**b),
                textures: textures.as_ref(),
            },
        )?;

        let cull = match &inner.culling {
            Some(culling) => {
                let instances = instances.ok_or_else(|| missing_prerequisite("instance arena"))?;
                let shader = self.shaders.load(&self.resolved.cull_shader)?;
                Some(culling.create_gpu_state(&self.backend, &shader, instances)?)
            }
            None => None,
        };

        Ok(PipelineGpuState {
            render_state,
            bindings,
            textures,
            cull,
        })
    }

    /// Register a batch; returns how many leading objects were added
    pub fn add_objects(&self, objects: &[Arc<dyn MeshSource>]) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let candidate_space = inner.culling.as_ref().map(|c| c.free_space(&inner.objects));
        let arenas = BatchArenas {
            vertices: &mut inner.arenas.vertices,
            indices: inner.arenas.indices.as_mut(),
            instances: inner.arenas.instances.as_mut(),
            meshes: inner.arenas.meshes.as_mut(),
            candidate_space,
        };
        let added = self.appender.append(objects, &mut inner.offsets, arenas);
        let count = added.len();
        if count > 0 {
            Arc::make_mut(&mut inner.objects).extend(added);
        }

        log::debug!(
            "[MeshPipeline::add_objects] '{}': {} of {} objects added, {} registered",
            self.name,
            count,
            objects.len(),
            inner.objects.len()
        );
        count
    }

    /// Forget every object; capacity and GPU state are kept
    pub fn clear_objects(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.arenas.vertices.reset();
        for arena in [
            inner.arenas.indices.as_mut(),
            inner.arenas.instances.as_mut(),
            inner.arenas.meshes.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            arena.reset();
        }
        if let Some(culling) = inner.culling.as_mut() {
            culling.reset();
        }
        inner.offsets = RenderBatchOffsets::default();
        inner.objects = Arc::new(Vec::new());
        log::info!("[MeshPipeline::clear_objects] '{}' cleared", self.name);
    }

    /// Per-frame CPU work: rebind textures registered since the last build,
    /// rewrite dirty instance slots, clear their flags and turn newly
    /// registered objects into cull candidates.
    /// Returns the number of dirty objects processed.
    pub fn update(&self) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut rewritten = 0;

        if self.is_textured() && inner.texture_revision != self.textures.revision() {
            let formats = inner.formats;
            match self.rebuild_locked(inner, formats) {
                Ok(()) => log::info!(
                    "[MeshPipeline::update] '{}' rebound {} textures",
                    self.name,
                    self.textures.len()
                ),
                Err(error) => log::error!("[MeshPipeline::update] '{}' is not ready: {}", self.name, error),
            }
        }

        for object in inner.objects.iter() {
            if !object.source.is_dirty() {
                continue;
            }
            if let Some(instances) = inner.arenas.instances.as_mut() {
                let material = object.meshes.first().map(|m| m.material).unwrap_or_default();
                let record = InstanceRecord::new(
                    object.source.matrix(),
                    object.source.bounding_sphere(),
                    material,
                    object.first_mesh,
                    object.meshes.len() as u32,
                );
                if !instances.write_at(instance_offset(object.instance_id), bytemuck::bytes_of(&record)) {
                    continue;
                }
            }
            object.source.set_dirty(false);
            rewritten += 1;
        }

        if let Some(culling) = inner.culling.as_mut() {
            culling.update(&inner.objects);
        }
        rewritten
    }

    /// Detached view for this frame; `None` when the pipeline cannot render
    pub fn snapshot(&self) -> Option<DrawSnapshot<B>> {
        if !self.is_enabled() {
            return None;
        }
        let inner = self.inner.lock();
        let gpu = inner.gpu.clone()?;

        Some(DrawSnapshot {
            pipeline: self.name.clone(),
            dispatcher: self.dispatcher,
            gpu,
            vertices: ArenaView::of(&inner.arenas.vertices),
            indices: inner.arenas.indices.as_ref().and_then(ArenaView::of),
            objects: inner.objects.clone(),
            cull: inner.culling.as_ref().map(|c| c.frame()),
        })
    }

    /// Blocking readback of the last cull dispatch; `None` in direct mode
    pub fn read_visible_count(&self) -> Option<EngineResult<u32>> {
        let inner = self.inner.lock();
        inner
            .culling
            .as_ref()
            .map(|culling| culling.read_visible_count(&self.backend))
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let inner = self.inner.lock();
        let mut usage = MemoryUsage::new(self.name.clone());
        usage.arenas.push(inner.arenas.vertices.usage());
        for arena in [&inner.arenas.indices, &inner.arenas.instances, &inner.arenas.meshes]
            .into_iter()
            .flatten()
        {
            usage.arenas.push(arena.usage());
        }
        if let Some(culling) = &inner.culling {
            usage.arenas.extend(culling.usage());
        }
        usage
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn draw_mode(&self) -> DrawMode {
        self.resolved.mesh.draw_mode
    }

    pub fn resolved(&self) -> &ResolvedPipeline {
        &self.resolved
    }

    pub fn offsets(&self) -> RenderBatchOffsets {
        self.inner.lock().offsets
    }

    pub fn object_count(&self) -> usize {
        self.inner.lock().objects.len()
    }

    pub fn candidate_count(&self) -> u32 {
        self.inner
            .lock()
            .culling
            .as_ref()
            .map_or(0, |c| c.candidate_count())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// GPU state exists and the vertex arena is still allocated
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.lock();
        inner.gpu.is_some() && !inner.arenas.vertices.is_destroyed()
    }

    pub fn can_render(&self) -> bool {
        self.is_enabled() && self.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshPipelineConfig;
    use crate::gpu::buffer_layouts::Vertex;
    use crate::gpu::{BufferRequest, HeadlessBackend, MemoryTier};
    use crate::scene::{MaterialRef, Mesh, Renderable};
    use std::fs;

    const SHADER: &str = "@vertex\nfn vs_main() {}\n@vertex\nfn vs_indirect() {}\n@fragment\nfn fs_main() {}\n";
    const CULL: &str = "@compute\nfn cull_indexed() {}\n@compute\nfn cull_non_indexed() {}\n";

    fn pipeline(dir: &std::path::Path, mode: DrawMode) -> MeshPipeline<HeadlessBackend> {
        fs::write(dir.join("vertex_mesh.wgsl"), SHADER).expect("write shader");
        fs::write(dir.join("cull.wgsl"), CULL).expect("write cull shader");

        let backend = Arc::new(HeadlessBackend::new());
        let camera = backend
            .create_buffer(&BufferRequest {
                label: "camera",
                size: 80,
                role: BufferRole::Uniform,
                tier: MemoryTier::HostVisible,
            })
            .expect("camera");
        let config = PipelineConfig::VertexMesh(MeshPipelineConfig {
            reserved_vertex_space: 4096,
            reserved_instance_space: 1024,
            reserved_mesh_space: 1024,
            reserved_compute_space: 1024,
            device_local_vertex_space: false,
            draw_mode: mode,
            ..Default::default()
        });
        MeshPipeline::new(
            "test",
            &config,
            backend,
            Arc::new(DeviceMemoryBudget::new(0)),
            ShaderLibrary::new(dir),
            Arc::new(camera),
            Arc::new(TextureRegistry::new(2)),
            TargetFormats {
                color: wgpu::TextureFormat::Bgra8UnormSrgb,
                depth: None,
            },
            usize::MAX,
        )
        .expect("pipeline")
    }

    fn triangle(name: &str) -> Arc<dyn MeshSource> {
        Arc::new(Renderable::new(
            name,
            vec![Mesh::new(vec![Vertex::at([0.0; 3]); 3], vec![], MaterialRef::default())],
        ))
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_adds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path(), DrawMode::Direct);
        pipeline.add_objects(&[triangle("a")]);

        let snapshot = pipeline.snapshot().expect("ready");
        pipeline.add_objects(&[triangle("b"), triangle("c")]);

        assert_eq!(snapshot.objects.len(), 1);
        assert_eq!(snapshot.vertices.as_ref().map(|v| v.size), Some(96));
        assert_eq!(pipeline.object_count(), 3);
    }

    #[test]
    fn test_missing_shader_leaves_pipeline_not_ready() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path(), DrawMode::GpuIndirect);
        assert!(pipeline.is_ready());

        fs::remove_file(dir.path().join("cull.wgsl")).expect("remove");
        let formats = TargetFormats {
            color: wgpu::TextureFormat::Rgba8UnormSrgb,
            depth: None,
        };
        assert!(pipeline.rebuild_gpu_state(formats).is_err());
        assert!(!pipeline.is_ready());

        fs::write(dir.path().join("cull.wgsl"), CULL).expect("restore");
        pipeline.rebuild_gpu_state(formats).expect("rebuild");
        assert!(pipeline.is_ready());
    }

    #[test]
    fn test_update_clears_dirty_flags() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path(), DrawMode::GpuIndirect);
        let object = Arc::new(Renderable::new(
            "mover",
            vec![Mesh::new(vec![Vertex::at([0.0; 3]); 3], vec![], MaterialRef::default())],
        ));
        pipeline.add_objects(&[object.clone() as Arc<dyn MeshSource>]);

        object.set_position(cgmath::Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(pipeline.update(), 1);
        assert!(!object.is_dirty());
        assert_eq!(pipeline.update(), 0);
        assert_eq!(pipeline.candidate_count(), 1);
    }

    #[test]
    fn test_update_rewrites_the_instance_slot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path(), DrawMode::GpuIndirect);
        let still = Arc::new(Renderable::new(
            "still",
            vec![Mesh::new(vec![Vertex::at([0.0; 3]); 3], vec![], MaterialRef::default())],
        ));
        let mover = Arc::new(Renderable::new(
            "mover",
            vec![Mesh::new(vec![Vertex::at([0.0; 3]); 3], vec![], MaterialRef::default())],
        ));
        pipeline.add_objects(&[still as Arc<dyn MeshSource>, mover.clone() as Arc<dyn MeshSource>]);

        let moved = cgmath::Matrix4::from_translation(cgmath::Vector3::new(4.0, -2.0, 7.5));
        mover.set_matrix(moved);
        assert_eq!(pipeline.update(), 1);

        let inner = pipeline.inner.lock();
        let instances = inner.arenas.instances.as_ref().and_then(|a| a.buffer()).expect("instances");
        let bytes = instances.contents();
        let slot = instance_offset(1) as usize;
        let record: InstanceRecord =
            bytemuck::pod_read_unaligned(&bytes[slot..slot + std::mem::size_of::<InstanceRecord>()]);
        let expected: [[f32; 4]; 4] = moved.into();
        assert_eq!(record.transform, expected);
        assert!(!mover.is_dirty());

        let first: InstanceRecord =
            bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<InstanceRecord>()]);
        let identity: [[f32; 4]; 4] = cgmath::Matrix4::<f32>::from_scale(1.0).into();
        assert_eq!(first.transform, identity);
    }

    #[test]
    fn test_candidate_space_limits_the_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("vertex_mesh.wgsl"), SHADER).expect("write shader");
        fs::write(dir.path().join("cull.wgsl"), CULL).expect("write cull shader");
        let backend = Arc::new(HeadlessBackend::new());
        let camera = backend
            .create_buffer(&BufferRequest {
                label: "camera",
                size: 80,
                role: BufferRole::Uniform,
                tier: MemoryTier::HostVisible,
            })
            .expect("camera");
        let config = PipelineConfig::VertexMesh(MeshPipelineConfig {
            reserved_vertex_space: 4096,
            reserved_instance_space: 1024,
            reserved_mesh_space: 1024,
            reserved_compute_space: 2 * crate::constants::buffer_layouts::DRAW_CANDIDATE_SIZE,
            device_local_vertex_space: false,
            draw_mode: DrawMode::GpuIndirect,
            ..Default::default()
        });
        let pipeline = MeshPipeline::new(
            "narrow",
            &config,
            backend,
            Arc::new(DeviceMemoryBudget::new(0)),
            ShaderLibrary::new(dir.path()),
            Arc::new(camera),
            Arc::new(TextureRegistry::default()),
            TargetFormats {
                color: wgpu::TextureFormat::Bgra8UnormSrgb,
                depth: None,
            },
            usize::MAX,
        )
        .expect("pipeline");

        assert_eq!(pipeline.add_objects(&[triangle("a")]), 1);
        pipeline.update();

        // One candidate slot is left; "b" claims it before its first update
        assert_eq!(pipeline.add_objects(&[triangle("b"), triangle("c")]), 1);
        assert_eq!(pipeline.add_objects(&[triangle("d")]), 0);
        pipeline.update();
        assert_eq!(pipeline.object_count(), 2);
        assert_eq!(pipeline.candidate_count(), 2);
    }
}
