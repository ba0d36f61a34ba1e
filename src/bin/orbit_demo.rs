//! Orbiting camera over a field of cubes.
//!
//! "cubes" is an indexed color pipeline drawn directly; "crates" samples two
//! generated checker textures; "pillars" is a non-indexed pipeline culled on
//! the GPU when the adapter supports indirect-count draws. Set `STRATA_CONFIG` to load a TOML renderer config
//! instead of the built-in one.

use anyhow::{Context, Result};
use cgmath::{Deg, Matrix4, Point3, Vector3};
use std::sync::Arc;
use std::time::Instant;
use strata_engine::camera::Camera;
use strata_engine::config::{DrawMode, MeshPipelineConfig, NamedPipelineConfig, PipelineConfig, RendererConfig};
use strata_engine::constants::memory::MEGA_BYTE;
use strata_engine::gpu::buffer_layouts::Vertex;
use strata_engine::renderer::{surface_for_window, FrameOutcome, Renderer, SurfaceTarget};
use strata_engine::scene::{MaterialRef, Mesh, MeshSource, Renderable, RenderableRegistry};
use strata_engine::{logging, GpuBackend, WgpuBackend};
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::WindowBuilder;

const GRID: i32 = 12;
const SPACING: f32 = 3.0;

fn main() -> Result<()> {
    logging::init();

    let event_loop = EventLoop::new().context("creating event loop")?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Strata orbit demo")
            .with_inner_size(winit::dpi::PhysicalSize::new(1280, 720))
            .build(&event_loop)
            .context("creating window")?,
    );

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let surface = surface_for_window(&instance, window.clone())?;
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: Some(&surface),
        force_fallback_adapter: false,
    }))
    .context("no suitable GPU adapter")?;
    log::info!("[orbit_demo] Adapter: {:?}", adapter.get_info());

    let backend = Arc::new(pollster::block_on(WgpuBackend::request_device(&adapter))?);
    let config = match std::env::var("STRATA_CONFIG") {
        Ok(path) => RendererConfig::from_toml_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => default_config(backend.limits().supports_indirect_count),
    };

    let size = window.inner_size();
    let target = SurfaceTarget::new(surface, &adapter, &backend, size.width, size.height, config.vsync)?;
    let mut renderer = Renderer::new(backend, target, config)?;

    let registry = RenderableRegistry::new();
    let cubes = spawn_grid(&registry, "cube", cube_mesh, 0.0);
    let pillars = spawn_grid(&registry, "pillar", pillar_mesh, -4.0);

    let texture_size = renderer.config().texture_size;
    let textures = [
        ("amber", [230, 160, 40, 255], [90, 50, 10, 255]),
        ("slate", [120, 130, 150, 255], [40, 45, 60, 255]),
    ];
    for (name, light, dark) in textures {
        if let Err(e) = renderer
            .textures()
            .register(name, texture_size, texture_size, checker(texture_size, light, dark))
        {
            log::warn!("[orbit_demo] {}", e);
        }
    }
    let crates = spawn_crates(&registry);

    let spin_origin = grid_position(-GRID / 2, -GRID / 2, 0.0);
    for (name, objects) in [("cubes", &cubes), ("crates", &crates), ("pillars", &pillars)] {
        let sources: Vec<Arc<dyn MeshSource>> = objects.iter().map(|o| o.clone() as Arc<dyn MeshSource>).collect();
        match renderer.add_objects_to_pipeline(name, &sources) {
            Ok(added) => log::info!("[orbit_demo] '{}': {} of {} objects added", name, added, sources.len()),
            Err(e) => log::warn!("[orbit_demo] '{}': {}", name, e),
        }
    }

    let mut camera = Camera::new(size.width, size.height).with_clip_planes(0.1, 500.0);
    let start = Instant::now();
    let mut frames = 0u64;

    event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::CloseRequested => elwt.exit(),
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    renderer.pause();
                } else {
                    renderer.resume();
                    renderer.resize(size.width, size.height);
                    camera.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let t = start.elapsed().as_secs_f32();
                let radius = GRID as f32 * SPACING;
                camera.position = Point3::new(radius * (t * 0.2).cos(), 18.0, radius * (t * 0.2).sin());
                camera.look_at(Point3::new(0.0, 0.0, 0.0));

                // One spinning cube keeps the dirty-instance path busy
                if let Some(cube) = cubes.first() {
                    cube.set_matrix(Matrix4::from_translation(spin_origin) * Matrix4::from_angle_y(Deg(t * 90.0)));
                }

                match renderer.render(&camera) {
                    Ok(FrameOutcome::Presented(stats)) => {
                        frames += 1;
                        if frames % 600 == 0 {
                            log::info!(
                                "[orbit_demo] Frame {}: {} draw calls, {} visible, {} culled",
                                frames,
                                stats.draw_calls,
                                stats.visible_objects,
                                stats.culled_objects
                            );
                            for usage in renderer.memory_usage() {
                                log::info!(
                                    "[orbit_demo] '{}' uses {} of {} bytes",
                                    usage.pipeline,
                                    usage.total_used(),
                                    usage.total_capacity()
                                );
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("[orbit_demo] Fatal render error: {}", e);
                        elwt.exit();
                    }
                }
            }
            _ => {}
        },
        Event::AboutToWait => window.request_redraw(),
        _ => {}
    })?;

    Ok(())
}

fn default_config(gpu_culling: bool) -> RendererConfig {
    let small = MeshPipelineConfig {
        reserved_vertex_space: 4 * MEGA_BYTE,
        reserved_index_space: 2 * MEGA_BYTE,
        reserved_instance_space: MEGA_BYTE,
        reserved_mesh_space: MEGA_BYTE,
        reserved_compute_space: MEGA_BYTE,
        ..Default::default()
    };
    RendererConfig {
        pipelines: vec![
            NamedPipelineConfig {
                name: "cubes".into(),
                pipeline: PipelineConfig::ColorMesh(small.clone()),
            },
            NamedPipelineConfig {
                name: "crates".into(),
                pipeline: PipelineConfig::TextureMesh(small.clone()),
            },
            NamedPipelineConfig {
                name: "pillars".into(),
                pipeline: PipelineConfig::VertexMesh(MeshPipelineConfig {
                    draw_mode: if gpu_culling { DrawMode::GpuIndirect } else { DrawMode::Direct },
                    ..small
                }),
            },
        ],
        ..Default::default()
    }
}

fn spawn_grid(
    registry: &RenderableRegistry,
    prefix: &str,
    mesh: fn(MaterialRef) -> Mesh,
    height: f32,
) -> Vec<Arc<Renderable>> {
    let mut objects = Vec::new();
    for x in -GRID / 2..GRID / 2 {
        for z in -GRID / 2..GRID / 2 {
            let color = [
                (x + GRID / 2) as f32 / GRID as f32,
                0.6,
                (z + GRID / 2) as f32 / GRID as f32,
                1.0,
            ];
            let object = Arc::new(
                Renderable::new(format!("{}_{}_{}", prefix, x, z), vec![mesh(MaterialRef::Color(color))])
                    .with_matrix(Matrix4::from_translation(grid_position(x, z, height))),
            );
            if registry.register(object.clone()).is_some() {
                objects.push(object);
            }
        }
    }
    objects
}

/// One row of textured cubes along the far edge, alternating textures
fn spawn_crates(registry: &RenderableRegistry) -> Vec<Arc<Renderable>> {
    let mut objects = Vec::new();
    for x in -GRID / 2..GRID / 2 {
        let material = MaterialRef::Texture(x.rem_euclid(2) as u32);
        let object = Arc::new(
            Renderable::new(format!("crate_{}", x), vec![cube_mesh(material)])
                .with_matrix(Matrix4::from_translation(grid_position(x, GRID / 2, 3.0))),
        );
        if registry.register(object.clone()).is_some() {
            objects.push(object);
        }
    }
    objects
}

/// 8x8-cell checker in two colours
fn checker(size: u32, light: [u8; 4], dark: [u8; 4]) -> Vec<u8> {
    let cell = (size / 8).max(1);
    let mut rgba = Vec::with_capacity(size as usize * size as usize * 4);
    for y in 0..size {
        for x in 0..size {
            let texel = if (x / cell + y / cell) % 2 == 0 { light } else { dark };
            rgba.extend_from_slice(&texel);
        }
    }
    rgba
}

fn grid_position(x: i32, z: i32, height: f32) -> Vector3<f32> {
    Vector3::new(x as f32 * SPACING, height, z as f32 * SPACING)
}

fn cube_mesh(material: MaterialRef) -> Mesh {
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [0.0, 0.0, -1.0], [1.0, 0.0, 0.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = [
                (normal[0] + u[0] * su + v[0] * sv) * 0.5,
                (normal[1] + u[1] * su + v[1] * sv) * 0.5,
                (normal[2] + u[2] * su + v[2] * sv) * 0.5,
            ];
            vertices.push(Vertex::new(position, normal, [(su + 1.0) * 0.5, (sv + 1.0) * 0.5]));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    Mesh::new(vertices, indices, material)
}

/// Cube stretched upward and expanded into a plain triangle list
fn pillar_mesh(material: MaterialRef) -> Mesh {
    let cube = cube_mesh(material);
    let vertices = cube
        .indices
        .iter()
        .map(|&i| {
            let mut vertex = cube.vertices[i as usize];
            vertex.position[1] = vertex.position[1] * 4.0 + 2.0;
            vertex
        })
        .collect();
    Mesh::new(vertices, Vec::new(), material)
}
