//! Batch registration of mesh sources into a pipeline's arenas
//!
//! A batch is planned first (how many leading objects fit in every arena),
//! then serialized into one byte run per arena and appended with a single
//! `append` each. Offsets are element counters, not byte offsets.

use crate::constants::buffer_layouts::{DRAW_CANDIDATE_SIZE, INSTANCE_RECORD_SIZE, MESH_METADATA_SIZE};
use crate::error::missing_prerequisite;
use crate::gpu::buffer_layouts::{InstanceRecord, MeshMetadata};
use crate::gpu::GpuBackend;
use crate::memory::BufferArena;
use crate::scene::{MaterialRef, MeshSource};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderBatchOffsets {
    pub vertex_offset: u32,
    pub index_offset: u32,
    /// Mesh slots, GPU-indirect only
    pub mesh_offset: u32,
    /// Instance slots, GPU-indirect only
    pub instance_offset: u32,
}

/// Where one registered mesh landed
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeshRange {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    /// Zero for non-indexed pipelines
    pub index_count: u32,
    pub material: MaterialRef,
}

/// An accepted object and the slots it occupies
#[derive(Clone)]
pub struct RegisteredObject {
    pub source: Arc<dyn MeshSource>,
    pub instance_id: u32,
    pub first_mesh: u32,
    pub meshes: Vec<MeshRange>,
}

impl std::fmt::Debug for RegisteredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredObject")
            .field("name", &self.source.name())
            .field("instance_id", &self.instance_id)
            .field("first_mesh", &self.first_mesh)
            .field("meshes", &self.meshes)
            .finish()
    }
}

/// The arenas a batch is appended into
pub struct BatchArenas<'p, B: GpuBackend> {
    pub vertices: &'p mut BufferArena<B>,
    pub indices: Option<&'p mut BufferArena<B>>,
    pub instances: Option<&'p mut BufferArena<B>>,
    pub meshes: Option<&'p mut BufferArena<B>>,
    /// Free candidate bytes left for new meshes, GPU-indirect only
    pub candidate_space: Option<u64>,
}

/// Free bytes per arena; absent arenas report `u64::MAX`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ArenaSpace {
    pub vertex: u64,
    pub index: u64,
    pub instance: u64,
    pub mesh: u64,
    pub candidate: u64,
}

impl ArenaSpace {
    pub fn of<B: GpuBackend>(arenas: &BatchArenas<'_, B>) -> Self {
        let free = |arena: &Option<&mut BufferArena<B>>| {
            arena.as_ref().map_or(u64::MAX, |a| a.remaining())
        };
        Self {
            vertex: arenas.vertices.remaining(),
            index: free(&arenas.indices),
            instance: free(&arenas.instances),
            mesh: free(&arenas.meshes),
            candidate: arenas.candidate_space.unwrap_or(u64::MAX),
        }
    }
}

/// Outcome of [`RenderableBatchAppender::plan`]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchPlan {
    /// Leading objects that fit
    pub accepted: usize,
    /// Visited objects that were never registered
    pub unregistered: usize,
}

#[derive(Default)]
struct BatchBytes {
    vertices: Vec<u8>,
    indices: Vec<u8>,
    instances: Vec<u8>,
    meshes: Vec<u8>,
}

#[derive(Copy, Clone, Debug)]
pub struct RenderableBatchAppender {
    indexed: bool,
    gpu_driven: bool,
}

impl RenderableBatchAppender {
    pub fn new(indexed: bool, gpu_driven: bool) -> Self {
        Self { indexed, gpu_driven }
    }

    /// Count the leading objects whose bytes fit in `space`.
    /// The first object that overflows any arena ends the batch.
    pub fn plan(&self, objects: &[Arc<dyn MeshSource>], space: ArenaSpace) -> BatchPlan {
        let (mut vertex, mut index, mut instance, mut mesh, mut candidate) = (0u64, 0u64, 0u64, 0u64, 0u64);
        let mut unregistered = 0;

        for (accepted, object) in objects.iter().enumerate() {
            if !object.has_been_registered() {
                log::warn!(
                    "[RenderableBatchAppender::plan] '{}' was never registered; adding it anyway",
                    object.name()
                );
                unregistered += 1;
            }

            let meshes = object.meshes();
            vertex += meshes.iter().map(|m| m.vertex_bytes()).sum::<u64>();
            if self.indexed {
                index += meshes.iter().map(|m| m.index_bytes()).sum::<u64>();
            }
            if self.gpu_driven {
                instance += INSTANCE_RECORD_SIZE;
                mesh += meshes.len() as u64 * MESH_METADATA_SIZE;
                candidate += meshes.len() as u64 * DRAW_CANDIDATE_SIZE;
            }

            if vertex > space.vertex
                || index > space.index
                || instance > space.instance
                || mesh > space.mesh
                || candidate > space.candidate
            {
                log::warn!(
                    "[RenderableBatchAppender::plan] '{}' does not fit; accepting {} of {} objects",
                    object.name(),
                    accepted,
                    objects.len()
                );
                return BatchPlan { accepted, unregistered };
            }
        }
        BatchPlan {
            accepted: objects.len(),
            unregistered,
        }
    }

    /// Append as many leading objects as fit and advance `offsets`.
    ///
    /// Returns the accepted objects. If any arena append fails, the arenas
    /// already written are rolled back, `offsets` is untouched and nothing is
    /// returned.
    pub fn append<B: GpuBackend>(
        &self,
        objects: &[Arc<dyn MeshSource>],
        offsets: &mut RenderBatchOffsets,
        mut arenas: BatchArenas<'_, B>,
    ) -> Vec<RegisteredObject> {
        if objects.is_empty() {
            return Vec::new();
        }
        if self.indexed && arenas.indices.is_none() {
            log::warn!("[RenderableBatchAppender::append] {}", missing_prerequisite("index arena"));
            return Vec::new();
        }
        if self.gpu_driven && (arenas.instances.is_none() || arenas.meshes.is_none()) {
            log::warn!(
                "[RenderableBatchAppender::append] {}",
                missing_prerequisite("instance and mesh metadata arenas")
            );
            return Vec::new();
        }

        let accepted = self.plan(objects, ArenaSpace::of(&arenas)).accepted;
        if accepted == 0 {
            return Vec::new();
        }

        let mut next = *offsets;
        let mut bytes = BatchBytes::default();
        let registered: Vec<RegisteredObject> = objects[..accepted]
            .iter()
            .map(|object| self.serialize(object, &mut next, &mut bytes))
            .collect();

        if !Self::append_all(&mut arenas, &bytes) {
            log::error!(
                "[RenderableBatchAppender::append] Batch of {} objects rolled back after a failed append",
                accepted
            );
            return Vec::new();
        }

        // The appended records carry the current transforms
        for object in &objects[..accepted] {
            object.set_dirty(false);
        }

        log::debug!(
            "[RenderableBatchAppender::append] {} objects, {} vertex bytes, {} index bytes",
            accepted,
            bytes.vertices.len(),
            bytes.indices.len()
        );
        *offsets = next;
        registered
    }

    fn serialize(
        &self,
        object: &Arc<dyn MeshSource>,
        next: &mut RenderBatchOffsets,
        bytes: &mut BatchBytes,
    ) -> RegisteredObject {
        let instance_id = next.instance_offset;
        let first_mesh = next.mesh_offset;
        let mut meshes = Vec::with_capacity(object.meshes().len());

        for mesh in object.meshes() {
            let range = MeshRange {
                vertex_offset: next.vertex_offset,
                vertex_count: mesh.vertices.len() as u32,
                index_offset: next.index_offset,
                index_count: if self.indexed { mesh.indices.len() as u32 } else { 0 },
                material: mesh.material,
            };

            bytes.vertices.extend_from_slice(bytemuck::cast_slice(&mesh.vertices));
            if self.indexed {
                bytes.indices.extend_from_slice(bytemuck::cast_slice(&mesh.indices));
            }
            if self.gpu_driven {
                let metadata =
                    MeshMetadata::new(mesh.material, instance_id, range.vertex_offset, range.index_offset);
                bytes.meshes.extend_from_slice(bytemuck::bytes_of(&metadata));
                next.mesh_offset += 1;
            }

            next.vertex_offset += range.vertex_count;
            next.index_offset += range.index_count;
            meshes.push(range);
        }

        if self.gpu_driven {
            let material = object.meshes().first().map(|m| m.material).unwrap_or_default();
            let record = InstanceRecord::new(
                object.matrix(),
                object.bounding_sphere(),
                material,
                first_mesh,
                meshes.len() as u32,
            );
            bytes.instances.extend_from_slice(bytemuck::bytes_of(&record));
            next.instance_offset += 1;
        }

        RegisteredObject {
            source: object.clone(),
            instance_id,
            first_mesh,
            meshes,
        }
    }

    fn append_all<B: GpuBackend>(arenas: &mut BatchArenas<'_, B>, bytes: &BatchBytes) -> bool {
        let before = (
            arenas.vertices.content_size(),
            arenas.indices.as_ref().map(|a| a.content_size()),
            arenas.instances.as_ref().map(|a| a.content_size()),
            arenas.meshes.as_ref().map(|a| a.content_size()),
        );

        let appended = arenas.vertices.append(&bytes.vertices)
            && arenas.indices.as_deref_mut().map_or(true, |a| a.append(&bytes.indices))
            && arenas.instances.as_deref_mut().map_or(true, |a| a.append(&bytes.instances))
            && arenas.meshes.as_deref_mut().map_or(true, |a| a.append(&bytes.meshes));

        if !appended {
            arenas.vertices.truncate(before.0);
            if let (Some(arena), Some(size)) = (arenas.indices.as_deref_mut(), before.1) {
                arena.truncate(size);
            }
            if let (Some(arena), Some(size)) = (arenas.instances.as_deref_mut(), before.2) {
                arena.truncate(size);
            }
            if let (Some(arena), Some(size)) = (arenas.meshes.as_deref_mut(), before.3) {
                arena.truncate(size);
            }
        }
        appended
    }
}
