//! Frame loop over named mesh pipelines
//!
//! The renderer owns the presentation target, the shared camera uniform and
//! the device-local budget. Each frame it takes a [`DrawSnapshot`] of every
//! ready pipeline, records their cull dispatches before the render pass and
//! their draws inside it, then submits and presents through the target.

use super::draw_dispatcher::DrawStats;
use super::frame_resources::FrameResourceManager;
use super::mesh_pipeline::{DrawSnapshot, MeshPipeline};
use super::target::{FrameError, FrameTarget, FrameWork};
use crate::camera::{FrustumPlanes, FrustumSource};
use crate::config::{PipelineConfig, RendererConfig};
use crate::constants::buffer_layouts::CAMERA_UNIFORM_SIZE;
use crate::error::{EngineError, EngineResult};
use crate::gpu::buffer_layouts::CameraUniform;
use crate::gpu::{BufferRequest, BufferRole, ComputeRecorder, DrawRecorder, GpuBackend, MemoryTier, ShaderLibrary};
use crate::memory::{DeviceMemoryBudget, MemoryUsage};
use crate::scene::{MeshSource, TextureRegistry};
use std::cell::Cell;
use std::sync::Arc;

/// Totals over all pipelines for one presented frame
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub pipelines_drawn: u32,
    pub draw_calls: u32,
    pub visible_objects: u32,
    pub culled_objects: u32,
}

impl FrameStats {
    fn add(&mut self, draw: DrawStats) {
        self.pipelines_drawn += 1;
        self.draw_calls += draw.draw_calls;
        self.visible_objects += draw.visible_objects;
        self.culled_objects += draw.culled_objects;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented(FrameStats),
    /// Target asked for a rebuild; it happens at the start of the next frame
    RebuildRequested,
    /// Acquire timed out
    Skipped,
    /// Rendering is paused
    Paused,
}

struct FramePlan<B: GpuBackend> {
    snapshots: Vec<DrawSnapshot<B>>,
    frustum: FrustumPlanes,
    stats: Cell<FrameStats>,
}

impl<B: GpuBackend> FrameWork<B> for FramePlan<B> {
    fn record_compute(&mut self, recorder: &mut dyn ComputeRecorder<B>) {
        for snapshot in &self.snapshots {
            snapshot.record_compute(recorder, &self.frustum);
        }
    }

    fn record_draws<'a>(&'a self, pass: &mut dyn DrawRecorder<'a, B>) {
        let mut stats = self.stats.get();
        for snapshot in &self.snapshots {
            stats.add(snapshot.draw(pass, &self.frustum));
        }
        self.stats.set(stats);
    }
}

pub struct Renderer<B: GpuBackend, T: FrameTarget<B>> {
    backend: Arc<B>,
    target: T,
    config: RendererConfig,
    budget: Arc<DeviceMemoryBudget>,
    shaders: ShaderLibrary,
    camera_buffer: Arc<B::Buffer>,
    textures: Arc<TextureRegistry>,
    pipelines: Vec<(String, Arc<MeshPipeline<B>>)>,
    frames: FrameResourceManager<B>,
}

impl<B: GpuBackend, T: FrameTarget<B>> Renderer<B, T> {
    /// Create the renderer and the pipelines listed in `config`.
    ///
    /// A pipeline that cannot be created is logged and left out; the others
    /// are still built.
    pub fn new(backend: Arc<B>, target: T, config: RendererConfig) -> EngineResult<Self> {
        config.validate()?;

        let camera_buffer = backend
            .create_buffer(&BufferRequest {
                label: "Camera Uniform",
                size: CAMERA_UNIFORM_SIZE,
                role: BufferRole::Uniform,
                tier: MemoryTier::HostVisible,
            })
            .map_err(|e| EngineError::HostAllocationFailed {
                arena: "camera uniform".into(),
                size: CAMERA_UNIFORM_SIZE,
                reason: e.to_string(),
            })?;
        backend.write_buffer(&camera_buffer, 0, bytemuck::bytes_of(&CameraUniform::default()));

        let mut renderer = Self {
            budget: Arc::new(DeviceMemoryBudget::new(config.device_memory_budget)),
            shaders: ShaderLibrary::new(&config.shader_directory),
            frames: FrameResourceManager::new(backend.clone(), config.buffering),
            camera_buffer: Arc::new(camera_buffer),
            textures: Arc::new(TextureRegistry::new(config.texture_size)),
            pipelines: Vec::new(),
            backend,
            target,
            config,
        };

        let initial = renderer.config.pipelines.clone();
        for entry in &initial {
            if let Err(error) = renderer.add_pipeline(&entry.name, &entry.pipeline) {
                log::error!("[Renderer::new] Skipping pipeline '{}': {}", entry.name, error);
            }
        }

        log::info!(
            "[Renderer::new] {} backend, {} pipelines, {} frames in flight",
            renderer.backend.name(),
            renderer.pipelines.len(),
            renderer.frames.buffering()
        );
        Ok(renderer)
    }

    /// Build and register a pipeline under a unique name.
    ///
    /// Rendering is paused while the pipeline is created unless it already was.
    pub fn add_pipeline(&mut self, name: &str, config: &PipelineConfig) -> EngineResult<Arc<MeshPipeline<B>>> {
        if self.pipelines.iter().any(|(existing, _)| existing == name) {
            return Err(EngineError::DuplicatePipeline { name: name.to_string() });
        }

        let was_paused = self.frames.is_paused();
        if !was_paused {
            self.frames.pause();
        }
        let created = MeshPipeline::new(
            name,
            config,
            self.backend.clone(),
            self.budget.clone(),
            self.shaders.clone(),
            self.camera_buffer.clone(),
            self.textures.clone(),
            self.target.formats(),
            self.config.parallel_cull_threshold,
        );
        if !was_paused {
            self.frames.resume();
        }

        let pipeline = Arc::new(created?);
        self.pipelines.push((name.to_string(), pipeline.clone()));
        log::info!("[Renderer::add_pipeline] Added '{}'", name);
        Ok(pipeline)
    }

    pub fn remove_pipeline(&mut self, name: &str) -> EngineResult<()> {
        let index = self
            .pipelines
            .iter()
            .position(|(existing, _)| existing == name)
            .ok_or_else(|| EngineError::UnknownPipeline { name: name.to_string() })?;

        // In-flight frames may still read the pipeline's buffers
        let was_paused = self.frames.is_paused();
        if !was_paused {
            self.frames.pause();
        }
        self.pipelines.remove(index);
        if !was_paused {
            self.frames.resume();
        }
        log::info!("[Renderer::remove_pipeline] Removed '{}'", name);
        Ok(())
    }

    /// Shared handle; `add_objects` on it is safe from any thread
    pub fn pipeline(&self, name: &str) -> Option<Arc<MeshPipeline<B>>> {
        self.pipelines
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, pipeline)| pipeline.clone())
    }

    /// Images sampled by `texture_mesh` pipelines; they pick up new
    /// registrations on their next update
    pub fn textures(&self) -> &Arc<TextureRegistry> {
        &self.textures
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        self.pipelines.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn add_objects_to_pipeline(&self, name: &str, objects: &[Arc<dyn MeshSource>]) -> EngineResult<usize> {
        let pipeline = self
            .pipeline(name)
            .ok_or_else(|| EngineError::UnknownPipeline { name: name.to_string() })?;
        Ok(pipeline.add_objects(objects))
    }

    pub fn clear_objects(&mut self, name: &str) -> EngineResult<()> {
        let pipeline = self
            .pipeline(name)
            .ok_or_else(|| EngineError::UnknownPipeline { name: name.to_string() })?;

        let was_paused = self.frames.is_paused();
        if !was_paused {
            self.frames.pause();
        }
        pipeline.clear_objects();
        if !was_paused {
            self.frames.resume();
        }
        Ok(())
    }

    pub fn memory_usage(&self) -> Vec<MemoryUsage> {
        self.pipelines.iter().map(|(_, p)| p.memory_usage()).collect()
    }

    /// Rebuild every pipeline's GPU state for the current target formats.
    /// Failures are logged and leave that pipeline non-ready.
    pub fn recreate_pipelines(&mut self) {
        let formats = self.target.formats();
        for (name, pipeline) in &self.pipelines {
            if let Err(error) = pipeline.rebuild_gpu_state(formats) {
                log::error!("[Renderer::recreate_pipelines] '{}' left not ready: {}", name, error);
            }
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.target.resize(width, height);
        self.frames.request_rebuild();
    }

    /// Wait for the device and stop rendering, e.g. while minimized
    pub fn pause(&mut self) {
        self.frames.pause();
    }

    pub fn resume(&mut self) {
        self.frames.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.frames.is_paused()
    }

    pub fn render(&mut self, camera: &dyn FrustumSource) -> EngineResult<FrameOutcome> {
        if self.frames.requires_rebuild() {
            self.rebuild()?;
        }
        if self.frames.is_paused() {
            return Ok(FrameOutcome::Paused);
        }

        self.frames.begin_frame();
        self.backend
            .write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&CameraUniform::from_source(camera)));

        let snapshots: Vec<DrawSnapshot<B>> = self
            .pipelines
            .iter()
            .filter_map(|(_, pipeline)| {
                pipeline.update();
                pipeline.snapshot()
            })
            .collect();

        let mut plan = FramePlan {
            snapshots,
            frustum: camera.frustum_planes(),
            stats: Cell::new(FrameStats::default()),
        };

        match self.target.render_frame(self.config.clear_color, &mut plan) {
            Ok(fence) => {
                self.frames.end_frame(fence);
                Ok(FrameOutcome::Presented(plan.stats.get()))
            }
            Err(error) if error.requires_rebuild() => {
                log::warn!("[Renderer::render] {}; rebuilding next frame", error);
                self.frames.request_rebuild();
                Ok(FrameOutcome::RebuildRequested)
            }
            Err(FrameError::Timeout) => {
                log::debug!("[Renderer::render] Acquire timed out; frame skipped");
                Ok(FrameOutcome::Skipped)
            }
            Err(FrameError::Engine(error)) => Err(error),
            Err(error) => Err(EngineError::Surface(error.to_string())),
        }
    }

    fn rebuild(&mut self) -> EngineResult<()> {
        let was_paused = self.frames.is_paused();
        self.frames.pause();
        self.target.rebuild()?;
        self.recreate_pipelines();
        self.frames.clear_rebuild();
        if !was_paused {
            self.frames.resume();
        }
        Ok(())
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn budget(&self) -> &DeviceMemoryBudget {
        &self.budget
    }

    pub fn frames(&self) -> &FrameResourceManager<B> {
        &self.frames
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl<B: GpuBackend, T: FrameTarget<B>> Drop for Renderer<B, T> {
    fn drop(&mut self) {
        self.frames.pause();
        self.pipelines.clear();
        self.backend.destroy_buffer(&self.camera_buffer);
    }
}
