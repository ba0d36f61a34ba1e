//! Mesh pipelines and the frame loop
//!
//! Pipelines append renderables into GPU arenas through the batch appender,
//! optionally cull them on the GPU, and are drawn by the dispatcher inside the
//! frame the `Renderer` records into a `FrameTarget`.

pub mod batch_appender;
pub mod culling;
pub mod draw_dispatcher;
pub mod frame_loop;
pub mod frame_resources;
pub mod mesh_pipeline;
pub mod surface_target;
pub mod target;

pub use batch_appender::{MeshRange, RegisteredObject, RenderBatchOffsets, RenderableBatchAppender};
pub use culling::{workgroup_count, CullFrame, CullPipelineState, CullingStage};
pub use draw_dispatcher::{DrawDispatcher, DrawStats};
pub use frame_loop::{FrameOutcome, FrameStats, Renderer};
pub use frame_resources::FrameResourceManager;
pub use mesh_pipeline::{ArenaView, DrawSnapshot, MeshPipeline, PipelineGpuState};
pub use surface_target::{surface_for_window, SurfaceTarget};
pub use target::{FrameError, FrameTarget, FrameWork, HeadlessTarget, TargetFormats};
