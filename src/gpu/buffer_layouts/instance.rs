//! Instance and per-mesh layouts used by the mesh pipelines

use crate::constants::buffer_layouts::NO_TEXTURE;
use crate::scene::{BoundingSphere, MaterialRef};
use bytemuck::{Pod, Zeroable};
use cgmath::Matrix4;

/// Per-object record read by the cull shader and the indirect vertex path
/// Total size: 112 bytes
///
/// Memory layout:
/// - Offset 0-63: transform (column major)
/// - Offset 64-79: bounding sphere (xyz center, w radius)
/// - Offset 80-95: color of the first mesh
/// - Offset 96-111: first mesh slot, mesh count, texture index, padding
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    pub transform: [[f32; 4]; 4],
    pub bounding_sphere: [f32; 4],
    pub color: [f32; 4],
    pub mesh_index: u32,
    pub mesh_count: u32,
    pub texture_index: u32,
    _padding: u32,
}

impl InstanceRecord {
    pub fn new(
        transform: Matrix4<f32>,
        sphere: BoundingSphere,
        material: MaterialRef,
        mesh_index: u32,
        mesh_count: u32,
    ) -> Self {
        Self {
            transform: transform.into(),
            bounding_sphere: sphere.to_array(),
            color: material.color(),
            mesh_index,
            mesh_count,
            texture_index: material.texture_index(),
            _padding: 0,
        }
    }

    pub fn sphere(&self) -> BoundingSphere {
        BoundingSphere::from_array(self.bounding_sphere)
    }
}

/// One entry per registered mesh, indexed by `first_instance` of indirect draws
/// Total size: 32 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshMetadata {
    pub color: [f32; 4],
    pub instance_id: u32,
    pub texture_index: u32,
    pub vertex_offset: u32,
    pub index_offset: u32,
}

impl MeshMetadata {
    pub fn new(material: MaterialRef, instance_id: u32, vertex_offset: u32, index_offset: u32) -> Self {
        Self {
            color: material.color(),
            instance_id,
            texture_index: material.texture_index(),
            vertex_offset,
            index_offset,
        }
    }

    pub fn has_texture(&self) -> bool {
        self.texture_index != NO_TEXTURE
    }
}

/// Per-draw constants for the direct path
/// Total size: 96 bytes (fits the 128 byte push constant minimum)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct DirectPushConstants {
    pub transform: [[f32; 4]; 4],
    pub color: [f32; 4],
    pub texture_index: u32,
    _padding: [u32; 3],
}

impl DirectPushConstants {
    pub fn new(transform: Matrix4<f32>, material: MaterialRef) -> Self {
        Self {
            transform: transform.into(),
            color: material.color(),
            texture_index: material.texture_index(),
            _padding: [0; 3],
        }
    }
}
