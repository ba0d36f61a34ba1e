// Frame loop behavior against the headless target: draw order, GPU culling,
// dirty instances and surface rebuilds

mod common;

use cgmath::Vector3;
use common::*;
use strata_engine::config::{DrawMode, MeshPipelineConfig, PipelineConfig};
use strata_engine::renderer::{FrameError, FrameOutcome, FrameStats, FrameTarget};
use strata_engine::gpu::RecordedCommand;
use strata_engine::scene::MeshSource;
use strata_engine::{EngineError, HeadlessBackend};

fn presented(outcome: FrameOutcome) -> FrameStats {
    match outcome {
        FrameOutcome::Presented(stats) => stats,
        other => panic!("expected a presented frame, got {:?}", other),
    }
}

#[test]
fn test_direct_indexed_draws_in_insertion_order() {
    let (_backend, mut renderer) = headless_renderer(
        HeadlessBackend::new(),
        renderer_config(vec![("props", PipelineConfig::ColorMesh(small_mesh_config(DrawMode::Direct)))]),
    );
    let objects = vec![
        object_at("a", 1.0, 3, true),
        object_at("b", 2.0, 3, true),
        object_at("c", 3.0, 3, true),
    ];
    renderer.add_objects_to_pipeline("props", &sources(&objects)).expect("pipeline");

    let stats = presented(renderer.render(&BoxView).expect("frame"));
    assert_eq!(stats.draw_calls, 3);
    assert_eq!(stats.visible_objects, 3);

    let draws: Vec<RecordedCommand> = renderer.target().draw_calls().into_iter().cloned().collect();
    assert_eq!(
        draws,
        vec![
            RecordedCommand::DrawIndexed { indices: 0..3, base_vertex: 0, instances: 0..1 },
            RecordedCommand::DrawIndexed { indices: 3..6, base_vertex: 3, instances: 0..1 },
            RecordedCommand::DrawIndexed { indices: 6..9, base_vertex: 6, instances: 0..1 },
        ]
    );
    assert!(matches!(
        renderer.target().last_frame().first(),
        Some(RecordedCommand::BindPipeline { label }) if label == "props"
    ));
}

#[test]
fn test_broken_pipeline_does_not_stop_the_others() {
    let broken = MeshPipelineConfig {
        reserved_index_space: 0,
        ..small_mesh_config(DrawMode::Direct)
    };
    let (_backend, mut renderer) = headless_renderer(
        HeadlessBackend::new(),
        renderer_config(vec![
            ("good", PipelineConfig::VertexMesh(small_mesh_config(DrawMode::Direct))),
            ("bad", PipelineConfig::ColorMesh(broken)),
        ]),
    );
    assert_eq!(renderer.pipeline_names(), vec!["good"]);

    let objects = vec![object_at("a", 1.0, 3, false), object_at("b", 2.0, 3, false)];
    renderer.add_objects_to_pipeline("good", &sources(&objects)).expect("pipeline");

    let stats = presented(renderer.render(&BoxView).expect("frame"));
    assert_eq!(stats.pipelines_drawn, 1);
    assert_eq!(stats.draw_calls, 2);
}

#[test]
fn test_direct_mode_culls_on_the_cpu() {
    let (_backend, mut renderer) = headless_renderer(
        HeadlessBackend::new(),
        renderer_config(vec![("props", PipelineConfig::VertexMesh(small_mesh_config(DrawMode::Direct)))]),
    );
    let objects = vec![
        object_at("near", 0.0, 3, false),
        object_at("far", 50.0, 3, false),
        object_at("edge", 10.5, 3, false),
    ];
    renderer.add_objects_to_pipeline("props", &sources(&objects)).expect("pipeline");

    let stats = presented(renderer.render(&BoxView).expect("frame"));
    assert_eq!(stats.visible_objects, 2);
    assert_eq!(stats.culled_objects, 1);
    assert_eq!(
        renderer.target().draw_calls().last().map(|c| (*c).clone()),
        Some(RecordedCommand::Draw { vertices: 6..9, instances: 0..1 })
    );
}

#[test]
fn test_empty_pipelines_record_nothing() {
    let (_backend, mut renderer) = headless_renderer(
        HeadlessBackend::new(),
        renderer_config(vec![
            ("direct", PipelineConfig::ColorMesh(small_mesh_config(DrawMode::Direct))),
            ("gpu", PipelineConfig::VertexMesh(small_mesh_config(DrawMode::GpuIndirect))),
        ]),
    );

    let stats = presented(renderer.render(&BoxView).expect("frame"));
    assert_eq!(stats.draw_calls, 0);
    assert!(renderer.target().last_frame().is_empty());
}

#[test]
fn test_gpu_culling_feeds_indirect_count_draw() {
    let (backend, mut renderer) = headless_renderer(
        HeadlessBackend::new(),
        renderer_config(vec![("field", PipelineConfig::VertexMesh(small_mesh_config(DrawMode::GpuIndirect)))]),
    );
    let objects = vec![
        object_at("a", 0.0, 3, false),
        object_at("far", 50.0, 3, false),
        object_at("b", 5.0, 3, false),
    ];
    renderer.add_objects_to_pipeline("field", &sources(&objects)).expect("pipeline");

    let stats = presented(renderer.render(&BoxView).expect("frame"));
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(backend.stats().dispatches, 1);
    assert_eq!(
        renderer.target().draw_calls(),
        vec![&RecordedCommand::DrawIndirectCount {
            max_count: 3,
            indexed: false,
            visible: 2,
        }]
    );

    let pipeline = renderer.pipeline("field").expect("pipeline");
    assert_eq!(pipeline.read_visible_count().map(|r| r.expect("readback")), Some(2));
}

#[test]
fn test_full_candidate_arena_reports_honest_counts() {
    let narrow = MeshPipelineConfig {
        reserved_mesh_space: 64,
        reserved_compute_space: 64,
        ..small_mesh_config(DrawMode::GpuIndirect)
    };
    let (_backend, mut renderer) = headless_renderer(
        HeadlessBackend::new(),
        renderer_config(vec![("field", PipelineConfig::VertexMesh(narrow))]),
    );

    let first = vec![object_at("a", 0.0, 3, false)];
    assert_eq!(renderer.add_objects_to_pipeline("field", &sources(&first)).expect("pipeline"), 1);
    presented(renderer.render(&BoxView).expect("frame"));

    let more = vec![object_at("b", 1.0, 3, false), object_at("c", 2.0, 3, false)];
    assert_eq!(renderer.add_objects_to_pipeline("field", &sources(&more)).expect("pipeline"), 1);
    presented(renderer.render(&BoxView).expect("frame"));

    let pipeline = renderer.pipeline("field").expect("pipeline");
    assert_eq!(pipeline.object_count(), 2);
    assert_eq!(pipeline.candidate_count(), 2);
    assert_eq!(pipeline.read_visible_count().map(|r| r.expect("readback")), Some(2));
}

#[test]
fn test_indexed_gpu_culling() {
    let (_backend, mut renderer) = headless_renderer(
        HeadlessBackend::new(),
        renderer_config(vec![("field", PipelineConfig::ColorMesh(small_mesh_config(DrawMode::GpuIndirect)))]),
    );
    let objects: Vec<_> = (0..40).map(|i| object_at(&format!("o{}", i), i as f32, 3, true)).collect();
    renderer.add_objects_to_pipeline("field", &sources(&objects)).expect("pipeline");

    presented(renderer.render(&BoxView).expect("frame"));
    // x = 0..=11 reach the |x| <= 10 box with radius 1
    assert_eq!(
        renderer.target().draw_calls(),
        vec![&RecordedCommand::DrawIndirectCount {
            max_count: 40,
            indexed: true,
            visible: 12,
        }]
    );
}

#[test]
fn test_moved_object_is_rewritten_before_culling() {
    let (_backend, mut renderer) = headless_renderer(
        HeadlessBackend::new(),
        renderer_config(vec![("field", PipelineConfig::VertexMesh(small_mesh_config(DrawMode::GpuIndirect)))]),
    );
    let objects = vec![object_at("mover", 0.0, 3, false), object_at("still", 1.0, 3, false)];
    renderer.add_objects_to_pipeline("field", &sources(&objects)).expect("pipeline");
    assert!(!objects[0].is_dirty());

    presented(renderer.render(&BoxView).expect("frame"));
    let pipeline = renderer.pipeline("field").expect("pipeline");
    assert_eq!(pipeline.read_visible_count().map(|r| r.expect("readback")), Some(2));

    objects[0].set_position(Vector3::new(100.0, 0.0, 0.0));
    assert!(objects[0].is_dirty());

    presented(renderer.render(&BoxView).expect("frame"));
    assert!(!objects[0].is_dirty());
    assert_eq!(pipeline.read_visible_count().map(|r| r.expect("readback")), Some(1));
}

#[test]
fn test_outdated_surface_rebuilds_next_frame() {
    let (backend, mut renderer) = headless_renderer(
        HeadlessBackend::new(),
        renderer_config(vec![("props", PipelineConfig::VertexMesh(small_mesh_config(DrawMode::Direct)))]),
    );
    renderer.add_objects_to_pipeline("props", &sources(&[object_at("a", 0.0, 3, false)])).expect("pipeline");

    renderer.target_mut().fail_next_frame(FrameError::Outdated);
    assert_eq!(renderer.render(&BoxView).expect("frame"), FrameOutcome::RebuildRequested);
    assert!(renderer.frames().requires_rebuild());
    assert_eq!(renderer.target().rebuilds(), 0);

    let idle_before = backend.stats().idle_waits;
    let stats = presented(renderer.render(&BoxView).expect("frame"));
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(renderer.target().rebuilds(), 1);
    assert!(backend.stats().idle_waits > idle_before);
    assert!(!renderer.frames().requires_rebuild());
    assert!(!renderer.is_paused());
    assert!(renderer.pipeline("props").expect("pipeline").is_ready());
}

#[test]
fn test_resize_requests_a_rebuild() {
    let (_backend, mut renderer) = headless_renderer(HeadlessBackend::new(), renderer_config(vec![]));

    renderer.resize(0, 600);
    assert!(!renderer.frames().requires_rebuild());

    renderer.resize(1024, 768);
    assert!(renderer.frames().requires_rebuild());
    presented(renderer.render(&BoxView).expect("frame"));
    assert_eq!(renderer.target().rebuilds(), 1);
    assert_eq!(renderer.target().size(), (1024, 768));
}

#[test]
fn test_timeout_skips_and_out_of_memory_is_fatal() {
    let (_backend, mut renderer) = headless_renderer(HeadlessBackend::new(), renderer_config(vec![]));

    renderer.target_mut().fail_next_frame(FrameError::Timeout);
    assert_eq!(renderer.render(&BoxView).expect("frame"), FrameOutcome::Skipped);
    assert_eq!(renderer.frames().frames_submitted(), 0);

    renderer.target_mut().fail_next_frame(FrameError::OutOfMemory);
    assert!(matches!(renderer.render(&BoxView), Err(EngineError::Surface(_))));
}

#[test]
fn test_paused_renderer_does_not_submit() {
    let (_backend, mut renderer) = headless_renderer(HeadlessBackend::new(), renderer_config(vec![]));

    renderer.pause();
    assert_eq!(renderer.render(&BoxView).expect("frame"), FrameOutcome::Paused);
    assert_eq!(renderer.target().frames_presented(), 0);

    renderer.resume();
    presented(renderer.render(&BoxView).expect("frame"));
    assert_eq!(renderer.target().frames_presented(), 1);
}

#[test]
fn test_frames_in_flight_bound_cpu_run_ahead() {
    let (backend, mut renderer) = headless_renderer(HeadlessBackend::new(), renderer_config(vec![]));

    // buffering = 2: the third frame reuses slot 0 and waits on its fence
    presented(renderer.render(&BoxView).expect("frame"));
    presented(renderer.render(&BoxView).expect("frame"));
    assert_eq!(backend.stats().fence_waits, 0);
    presented(renderer.render(&BoxView).expect("frame"));
    assert_eq!(backend.stats().fence_waits, 1);
    assert_eq!(renderer.frames().frames_submitted(), 3);
}
