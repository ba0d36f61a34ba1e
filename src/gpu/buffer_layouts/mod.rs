//! GPU buffer layouts
//!
//! Single source of truth for the structs the mesh and cull shaders read,
//! their binding indices and the size arithmetic used by the arenas.

pub mod camera;
pub mod commands;
pub mod instance;
pub mod mesh;


pub use camera::{CameraUniform, CullUniforms};
pub use commands::{DrawCandidate, IndirectDrawCommand, IndirectDrawIndexedCommand};
pub use instance::{DirectPushConstants, InstanceRecord, MeshMetadata};
pub use mesh::Vertex;

/// Binding indices, mirrored in shaders/*.wgsl
pub mod bindings {
    /// Mesh pipeline, group 0
    pub mod render {
        pub const CAMERA_UNIFORM: u32 = 0;
        pub const INSTANCES: u32 = 1;
        pub const MESH_METADATA: u32 = 2;
        /// texture_mesh only
        pub const TEXTURES: u32 = 3;
        pub const TEXTURE_SAMPLER: u32 = 4;
    }

    /// Cull pipeline, group 0
    pub mod culling {
        pub const UNIFORMS: u32 = 0;
        pub const CANDIDATES: u32 = 1;
        pub const INSTANCES: u32 = 2;
        pub const COMMANDS: u32 = 3;
        pub const DRAW_COUNT: u32 = 4;
    }
}

/// Size and offset arithmetic
pub mod calculations {
    use crate::constants::buffer_layouts::*;

    #[inline]
    pub fn instance_offset(index: u32) -> u64 {
        index as u64 * INSTANCE_RECORD_SIZE
    }

    #[inline]
    pub fn mesh_metadata_offset(slot: u32) -> u64 {
        slot as u64 * MESH_METADATA_SIZE
    }

    /// Bytes needed by an indirect array holding one command per candidate
    #[inline]
    pub fn indirect_buffer_size(candidates: u64, indexed: bool) -> u64 {
        let command_size = if indexed {
            INDIRECT_DRAW_INDEXED_SIZE
        } else {
            INDIRECT_DRAW_SIZE
        };
        candidates * command_size
    }

    /// Candidates that fit in `bytes` of candidate space
    #[inline]
    pub fn candidate_capacity(bytes: u64) -> u64 {
        bytes / DRAW_CANDIDATE_SIZE
    }

    #[inline]
    pub fn align_buffer_size(size: u64, alignment: u64) -> u64 {
        (size + alignment - 1) & !(alignment - 1)
    }
}

/// Buffer usage sets per arena role
pub mod usage {
    use wgpu::BufferUsages;

    pub const VERTEX: BufferUsages = BufferUsages::VERTEX.union(BufferUsages::COPY_DST);

    pub const INDEX: BufferUsages = BufferUsages::INDEX.union(BufferUsages::COPY_DST);

    pub const STORAGE: BufferUsages = BufferUsages::STORAGE.union(BufferUsages::COPY_DST);

    pub const UNIFORM: BufferUsages = BufferUsages::UNIFORM.union(BufferUsages::COPY_DST);

    /// Written by the cull shader, consumed by indirect draws
    pub const INDIRECT: BufferUsages = BufferUsages::INDIRECT
        .union(BufferUsages::STORAGE)
        .union(BufferUsages::COPY_DST);

    /// Cleared every frame and read back for diagnostics
    pub const DRAW_COUNT: BufferUsages = INDIRECT.union(BufferUsages::COPY_SRC);

    pub const STAGING: BufferUsages = BufferUsages::MAP_WRITE.union(BufferUsages::COPY_SRC);

    pub const READBACK: BufferUsages = BufferUsages::MAP_READ.union(BufferUsages::COPY_DST);
}

/// Bind group layout entry helpers
pub mod layouts {
    use wgpu::{
        BindGroupLayoutEntry, BindingType, BufferBindingType, SamplerBindingType, ShaderStages,
        TextureSampleType, TextureViewDimension,
    };

    pub fn storage_buffer_entry(
        binding: u32,
        read_only: bool,
        visibility: ShaderStages,
    ) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    pub fn uniform_buffer_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    pub fn texture_array_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::D2Array,
                multisampled: false,
            },
            count: None,
        }
    }

    pub fn sampler_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Sampler(SamplerBindingType::Filtering),
            count: None,
        }
    }
}
