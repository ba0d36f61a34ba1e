// Strata Engine Constants
//
// Shared by the CPU side and mirrored in the WGSL sources under shaders/.
// Keep both in sync when changing a layout or workgroup size.

/// Memory sizing constants
pub mod memory {
    pub const KILO_BYTE: u64 = 1024;
    pub const MEGA_BYTE: u64 = 1024 * KILO_BYTE;
    pub const GIGA_BYTE: u64 = 1024 * MEGA_BYTE;

    /// Default shared budget for device-local arenas
    pub const DEFAULT_DEVICE_MEMORY_BUDGET: u64 = 512 * MEGA_BYTE;

    /// Default reserves for a mesh pipeline
    pub const DEFAULT_VERTEX_SPACE: u64 = 64 * MEGA_BYTE;
    pub const DEFAULT_INDEX_SPACE: u64 = 32 * MEGA_BYTE;
    pub const DEFAULT_INSTANCE_SPACE: u64 = 8 * MEGA_BYTE;
    pub const DEFAULT_MESH_SPACE: u64 = 8 * MEGA_BYTE;

    /// Candidate and indirect command space for GPU-driven pipelines
    pub const DEFAULT_COMPUTE_SPACE: u64 = 50 * MEGA_BYTE;

    /// Copy alignment required by buffer-to-buffer copies and queue writes
    pub const COPY_ALIGNMENT: u64 = 4;
}

/// Frame pacing constants
pub mod frame {
    /// Triple buffering
    pub const DEFAULT_BUFFERING: usize = 3;
    pub const MAX_BUFFERING: usize = 8;
}

/// Culling constants
pub mod culling {
    /// Invocations per workgroup in cull_indexed / cull_non_indexed
    pub const WORKGROUP_SIZE: u32 = 32;

    /// Frustum planes: left, right, bottom, top, near, far
    pub const FRUSTUM_PLANE_COUNT: usize = 6;

    /// Objects above this count are frustum tested with rayon in direct mode
    pub const DEFAULT_PARALLEL_CULL_THRESHOLD: usize = 512;
}

/// GPU buffer layout constants
pub mod buffer_layouts {
    pub const VERTEX_SIZE: u64 = 32;
    pub const INDEX_SIZE: u64 = 4;
    pub const INSTANCE_RECORD_SIZE: u64 = 112;
    pub const MESH_METADATA_SIZE: u64 = 32;
    pub const DRAW_CANDIDATE_SIZE: u64 = 32;
    pub const INDIRECT_DRAW_SIZE: u64 = 16;
    pub const INDIRECT_DRAW_INDEXED_SIZE: u64 = 20;
    pub const DRAW_COUNT_SIZE: u64 = 4;
    pub const CULL_UNIFORMS_SIZE: u64 = 112;
    pub const CAMERA_UNIFORM_SIZE: u64 = 80;
    pub const DIRECT_PUSH_CONSTANTS_SIZE: u32 = 96;

    /// Sentinel for "no texture" in instance and mesh records
    pub const NO_TEXTURE: u32 = u32::MAX;
}

/// Texture array constants
pub mod textures {
    /// Edge length of every layer in the texture array
    pub const DEFAULT_TEXTURE_SIZE: u32 = 256;

    /// wgpu's default `max_texture_array_layers`
    pub const MAX_TEXTURE_LAYERS: u32 = 256;
}

/// Shader file names used when a pipeline config leaves them unset
pub mod shaders {
    pub const COLOR_MESH: &str = "color_mesh.wgsl";
    pub const TEXTURE_MESH: &str = "texture_mesh.wgsl";
    pub const VERTEX_MESH: &str = "vertex_mesh.wgsl";
    pub const CULL: &str = "cull.wgsl";

    pub const VERTEX_ENTRY: &str = "vs_main";
    pub const FRAGMENT_ENTRY: &str = "fs_main";
    pub const VERTEX_INDIRECT_ENTRY: &str = "vs_indirect";
    pub const CULL_INDEXED_ENTRY: &str = "cull_indexed";
    pub const CULL_NON_INDEXED_ENTRY: &str = "cull_non_indexed";
}
