// Shared fixtures for the headless integration tests

#![allow(dead_code)]

use cgmath::{Matrix4, Point3, SquareMatrix, Vector3};
use std::path::PathBuf;
use std::sync::Arc;
use strata_engine::camera::{FrustumPlanes, FrustumSource};
use strata_engine::config::{DrawMode, MeshPipelineConfig, NamedPipelineConfig, PipelineConfig, RendererConfig};
use strata_engine::gpu::buffer_layouts::Vertex;
use strata_engine::renderer::{HeadlessTarget, Renderer};
use strata_engine::scene::{BoundingSphere, MaterialRef, Mesh, MeshSource, Renderable};
use strata_engine::HeadlessBackend;

pub type HeadlessRenderer = Renderer<HeadlessBackend, HeadlessTarget>;

pub fn shader_directory() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("shaders")
}

/// Small host-visible reserves so tests stay cheap
pub fn small_mesh_config(draw_mode: DrawMode) -> MeshPipelineConfig {
    MeshPipelineConfig {
        reserved_vertex_space: 16 * 1024,
        reserved_index_space: 8 * 1024,
        reserved_instance_space: 4 * 1024,
        reserved_mesh_space: 4 * 1024,
        reserved_compute_space: 4 * 1024,
        device_local_vertex_space: false,
        device_local_index_space: false,
        draw_mode,
        ..Default::default()
    }
}

pub fn renderer_config(pipelines: Vec<(&str, PipelineConfig)>) -> RendererConfig {
    RendererConfig {
        shader_directory: shader_directory(),
        buffering: 2,
        pipelines: pipelines
            .into_iter()
            .map(|(name, pipeline)| NamedPipelineConfig {
                name: name.to_string(),
                pipeline,
            })
            .collect(),
        ..Default::default()
    }
}

pub fn headless_renderer(backend: HeadlessBackend, config: RendererConfig) -> (Arc<HeadlessBackend>, HeadlessRenderer) {
    strata_engine::logging::init_for_tests();
    let backend = Arc::new(backend);
    let target = HeadlessTarget::new(backend.clone(), 800, 600);
    let renderer = Renderer::new(backend.clone(), target, config).expect("renderer");
    (backend, renderer)
}

/// Triangle with `vertices` vertices (multiple of 3) and optional indices, unit sphere
pub fn object_at(name: &str, x: f32, vertices: usize, indexed: bool) -> Arc<Renderable> {
    let mesh = Mesh::new(
        (0..vertices).map(|i| Vertex::at([i as f32 * 0.1, 0.0, 0.0])).collect(),
        if indexed { (0..vertices as u32).collect() } else { Vec::new() },
        MaterialRef::Color([x, 0.0, 0.0, 1.0]),
    );
    let object = Renderable::new(name, vec![mesh])
        .with_local_sphere(BoundingSphere::new([0.0; 3], 1.0))
        .with_matrix(Matrix4::from_translation(Vector3::new(x, 0.0, 0.0)));
    object.flag_as_registered();
    Arc::new(object)
}

pub fn sources(objects: &[Arc<Renderable>]) -> Vec<Arc<dyn MeshSource>> {
    objects.iter().map(|o| o.clone() as Arc<dyn MeshSource>).collect()
}

/// Viewer whose frustum is the box |x|, |y|, |z| <= 10
pub struct BoxView;

impl FrustumSource for BoxView {
    fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::identity()
    }

    fn projection_matrix(&self) -> Matrix4<f32> {
        Matrix4::identity()
    }

    fn eye_position(&self) -> Point3<f32> {
        Point3::new(0.0, 0.0, 0.0)
    }

    fn frustum_planes(&self) -> FrustumPlanes {
        FrustumPlanes::from_arrays([
            [1.0, 0.0, 0.0, 10.0],
            [-1.0, 0.0, 0.0, 10.0],
            [0.0, 1.0, 0.0, 10.0],
            [0.0, -1.0, 0.0, 10.0],
            [0.0, 0.0, 1.0, 10.0],
            [0.0, 0.0, -1.0, 10.0],
        ])
    }
}
