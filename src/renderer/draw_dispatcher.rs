//! Draw submission for mesh pipelines
//!
//! Direct mode walks the registered objects in insertion order, frustum tests
//! each one on the CPU and issues one draw per mesh of every visible object.
//! GPU-indirect mode issues a single indirect-count draw over the commands the
//! cull pass produced.

use super::batch_appender::RegisteredObject;
use super::mesh_pipeline::DrawSnapshot;
use crate::camera::FrustumPlanes;
use crate::config::DrawMode;
use crate::gpu::buffer_layouts::DirectPushConstants;
use crate::gpu::{DrawRecorder, GpuBackend};
use rayon::prelude::*;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub draw_calls: u32,
    pub visible_objects: u32,
    pub culled_objects: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct DrawDispatcher {
    mode: DrawMode,
    indexed: bool,
    parallel_threshold: usize,
}

impl DrawDispatcher {
    pub fn new(mode: DrawMode, indexed: bool, parallel_threshold: usize) -> Self {
        Self {
            mode,
            indexed,
            parallel_threshold,
        }
    }

    pub fn mode(&self) -> DrawMode {
        self.mode
    }

    pub fn indexed(&self) -> bool {
        self.indexed
    }

    /// Record this pipeline's draws into `pass`
    pub fn draw<'a, B, R>(&self, pass: &mut R, snapshot: &'a DrawSnapshot<B>, frustum: &FrustumPlanes) -> DrawStats
    where
        B: GpuBackend,
        R: DrawRecorder<'a, B> + ?Sized,
    {
        // Unallocated or empty geometry means nothing to draw yet
        let Some(vertices) = snapshot.vertices.as_ref().filter(|v| v.size > 0) else {
            return DrawStats::default();
        };
        let indices = match (self.indexed, snapshot.indices.as_ref().filter(|i| i.size > 0)) {
            (false, _) => None,
            (true, Some(indices)) => Some(indices),
            (true, None) => return DrawStats::default(),
        };

        match self.mode {
            DrawMode::Direct => {
                pass.bind_pipeline(&snapshot.gpu.render_state, &snapshot.gpu.bindings);
                pass.set_vertex_buffer(&vertices.buffer, vertices.size);
                if let Some(indices) = indices {
                    pass.set_index_buffer(&indices.buffer, indices.size);
                }
                self.draw_direct(pass, &snapshot.objects, frustum)
            }
            DrawMode::GpuIndirect => {
                let Some(cull) = snapshot.cull.as_ref() else {
                    log::debug!("[DrawDispatcher::draw] '{}' has no culling stage", snapshot.pipeline);
                    return DrawStats::default();
                };
                let max_count = cull.max_draw_count();
                if max_count == 0 {
                    return DrawStats::default();
                }

                pass.bind_pipeline(&snapshot.gpu.render_state, &snapshot.gpu.bindings);
                pass.set_vertex_buffer(&vertices.buffer, vertices.size);
                if let Some(indices) = indices {
                    pass.set_index_buffer(&indices.buffer, indices.size);
                }
                pass.draw_indirect_count(cull.commands(), cull.draw_count(), max_count, self.indexed);
                DrawStats {
                    draw_calls: 1,
                    ..Default::default()
                }
            }
        }
    }

    fn draw_direct<'a, B, R>(&self, pass: &mut R, objects: &[RegisteredObject], frustum: &FrustumPlanes) -> DrawStats
    where
        B: GpuBackend,
        R: DrawRecorder<'a, B> + ?Sized,
    {
        let visibility = self.visibility(objects, frustum);
        let mut stats = DrawStats::default();

        for (object, visible) in objects.iter().zip(visibility) {
            if !visible {
                stats.culled_objects += 1;
                continue;
            }
            stats.visible_objects += 1;

            let transform = object.source.matrix();
            for mesh in &object.meshes {
                if mesh.vertex_count == 0 {
                    continue;
                }
                let constants = DirectPushConstants::new(transform, mesh.material);
                pass.set_push_constants(bytemuck::bytes_of(&constants));

                if self.indexed {
                    pass.draw_indexed(
                        mesh.index_offset..mesh.index_offset + mesh.index_count,
                        mesh.vertex_offset as i32,
                        0..1,
                    );
                } else {
                    pass.draw(mesh.vertex_offset..mesh.vertex_offset + mesh.vertex_count, 0..1);
                }
                stats.draw_calls += 1;
            }
        }
        stats
    }

    /// Per-object frustum test, in object order
    pub fn visibility(&self, objects: &[RegisteredObject], frustum: &FrustumPlanes) -> Vec<bool> {
        let test = |object: &RegisteredObject| frustum.intersects_sphere(&object.source.bounding_sphere());
        if objects.len() > self.parallel_threshold {
            objects.par_iter().map(test).collect()
        } else {
            objects.iter().map(test).collect()
        }
    }
}
