//! Indirect command layouts
//!
//! `IndirectDrawCommand` and `IndirectDrawIndexedCommand` match the argument
//! layouts wgpu reads for `multi_draw_indirect_count` and
//! `multi_draw_indexed_indirect_count`. `DrawCandidate` is the CPU-prepared input
//! of the cull shader: one per registered mesh, carrying a ready-made command plus
//! the instance whose bounding sphere decides visibility.

use bytemuck::{Pod, Zeroable};

/// Non-indexed indirect draw arguments
/// Total size: 16 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectDrawCommand {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    /// Mesh slot id, read back in the vertex shader through `instance_index`
    pub first_instance: u32,
}

/// Indexed indirect draw arguments
/// Total size: 20 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectDrawIndexedCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    /// Mesh slot id, read back in the vertex shader through `instance_index`
    pub first_instance: u32,
}

/// Cull shader input
/// Total size: 32 bytes
///
/// Memory layout:
/// - Offset 0-19: command fields (indexed shape; the non-indexed shader ignores
///   `base_vertex` and uses `first_element` as the first vertex)
/// - Offset 20-23: instance id
/// - Offset 24-31: padding
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawCandidate {
    pub element_count: u32,
    pub instance_count: u32,
    pub first_element: u32,
    pub base_vertex: i32,
    pub mesh_id: u32,
    pub instance_id: u32,
    _padding: [u32; 2],
}

impl DrawCandidate {
    pub fn indexed(
        index_count: u32,
        first_index: u32,
        base_vertex: i32,
        mesh_id: u32,
        instance_id: u32,
    ) -> Self {
        Self {
            element_count: index_count,
            instance_count: 1,
            first_element: first_index,
            base_vertex,
            mesh_id,
            instance_id,
            _padding: [0; 2],
        }
    }

    pub fn non_indexed(vertex_count: u32, first_vertex: u32, mesh_id: u32, instance_id: u32) -> Self {
        Self {
            element_count: vertex_count,
            instance_count: 1,
            first_element: first_vertex,
            base_vertex: 0,
            mesh_id,
            instance_id,
            _padding: [0; 2],
        }
    }

    pub fn to_indexed_command(&self) -> IndirectDrawIndexedCommand {
        IndirectDrawIndexedCommand {
            index_count: self.element_count,
            instance_count: self.instance_count,
            first_index: self.first_element,
            base_vertex: self.base_vertex,
            first_instance: self.mesh_id,
        }
    }

    pub fn to_command(&self) -> IndirectDrawCommand {
        IndirectDrawCommand {
            vertex_count: self.element_count,
            instance_count: self.instance_count,
            first_vertex: self.first_element,
            first_instance: self.mesh_id,
        }
    }
}
