//! Renderer and pipeline configuration
//!
//! Everything here is plain serde data so a whole renderer setup can live in one
//! TOML file. Pipeline variants are matched exactly once, in
//! [`PipelineConfig::resolve`], when a pipeline is constructed.

use crate::constants::{buffer_layouts, culling, frame, memory, shaders, textures};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How a mesh pipeline issues its draws; fixed for the pipeline's lifetime
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawMode {
    /// CPU frustum test, one draw per visible mesh
    #[default]
    Direct,
    /// Compute culling feeding one indirect-count draw
    GpuIndirect,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

impl Topology {
    pub fn to_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            Topology::PointList => wgpu::PrimitiveTopology::PointList,
            Topology::LineList => wgpu::PrimitiveTopology::LineList,
            Topology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
            Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

/// Settings shared by every mesh pipeline variant
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshPipelineConfig {
    pub reserved_vertex_space: u64,
    /// Ignored by non-indexed variants
    pub reserved_index_space: u64,
    /// GPU-indirect mode only
    pub reserved_instance_space: u64,
    /// GPU-indirect mode only
    pub reserved_mesh_space: u64,
    /// Candidate space for the cull pass; the indirect array is sized to match
    pub reserved_compute_space: u64,
    pub device_local_vertex_space: bool,
    pub device_local_index_space: bool,
    pub draw_mode: DrawMode,
    /// Overrides the variant's default shader file
    pub shader: Option<String>,
    pub cull_shader: Option<String>,
    pub topology: Topology,
    pub depth_test: bool,
    pub color_blend: bool,
    pub cull_back_faces: bool,
    pub enabled: bool,
}

impl Default for MeshPipelineConfig {
    fn default() -> Self {
        Self {
            reserved_vertex_space: memory::DEFAULT_VERTEX_SPACE,
            reserved_index_space: memory::DEFAULT_INDEX_SPACE,
            reserved_instance_space: memory::DEFAULT_INSTANCE_SPACE,
            reserved_mesh_space: memory::DEFAULT_MESH_SPACE,
            reserved_compute_space: memory::DEFAULT_COMPUTE_SPACE,
            device_local_vertex_space: true,
            device_local_index_space: true,
            draw_mode: DrawMode::Direct,
            shader: None,
            cull_shader: None,
            topology: Topology::TriangleList,
            depth_test: true,
            color_blend: true,
            cull_back_faces: true,
            enabled: true,
        }
    }
}

/// Pipeline payloads, one variant per mesh kind
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineConfig {
    /// Indexed meshes shaded with a per-mesh color
    ColorMesh(MeshPipelineConfig),
    /// Indexed meshes sampling a texture by index
    TextureMesh(MeshPipelineConfig),
    /// Non-indexed meshes
    VertexMesh(MeshPipelineConfig),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MeshKind {
    Color,
    Texture,
    Vertex,
}

/// Result of matching a [`PipelineConfig`]
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPipeline {
    pub kind: MeshKind,
    pub indexed: bool,
    pub shader: String,
    pub cull_shader: String,
    pub mesh: MeshPipelineConfig,
}

impl PipelineConfig {
    pub fn mesh(&self) -> &MeshPipelineConfig {
        match self {
            PipelineConfig::ColorMesh(mesh)
            | PipelineConfig::TextureMesh(mesh)
            | PipelineConfig::VertexMesh(mesh) => mesh,
        }
    }

    pub fn resolve(&self) -> ResolvedPipeline {
        let (kind, indexed, default_shader, mesh) = match self {
            PipelineConfig::ColorMesh(mesh) => (MeshKind::Color, true, shaders::COLOR_MESH, mesh),
            PipelineConfig::TextureMesh(mesh) => {
                (MeshKind::Texture, true, shaders::TEXTURE_MESH, mesh)
            }
            PipelineConfig::VertexMesh(mesh) => {
                (MeshKind::Vertex, false, shaders::VERTEX_MESH, mesh)
            }
        };

        ResolvedPipeline {
            kind,
            indexed,
            shader: mesh
                .shader
                .clone()
                .unwrap_or_else(|| default_shader.to_string()),
            cull_shader: mesh
                .cull_shader
                .clone()
                .unwrap_or_else(|| shaders::CULL.to_string()),
            mesh: mesh.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedPipelineConfig {
    pub name: String,
    pub pipeline: PipelineConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub shader_directory: PathBuf,
    /// Frames in flight
    pub buffering: usize,
    /// Shared budget for device-local arenas, in bytes
    pub device_memory_budget: u64,
    pub clear_color: [f64; 4],
    pub vsync: bool,
    pub parallel_cull_threshold: usize,
    /// Edge length of each texture array layer
    pub texture_size: u32,
    pub pipelines: Vec<NamedPipelineConfig>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shader_directory: PathBuf::from("shaders"),
            buffering: frame::DEFAULT_BUFFERING,
            device_memory_budget: memory::DEFAULT_DEVICE_MEMORY_BUDGET,
            clear_color: [0.05, 0.05, 0.08, 1.0],
            vsync: true,
            parallel_cull_threshold: culling::DEFAULT_PARALLEL_CULL_THRESHOLD,
            texture_size: textures::DEFAULT_TEXTURE_SIZE,
            pipelines: Vec::new(),
        }
    }
}

impl RendererConfig {
    pub fn from_toml_str(source: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let source = fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml_str(&source)?;
        if config.shader_directory.is_relative() {
            if let Some(parent) = path.as_ref().parent() {
                config.shader_directory = parent.join(&config.shader_directory);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.buffering == 0 || self.buffering > frame::MAX_BUFFERING {
            return Err(EngineError::Config(format!(
                "buffering must be within 1..={}, got {}",
                frame::MAX_BUFFERING,
                self.buffering
            )));
        }
        if self.texture_size == 0 {
            return Err(EngineError::Config("texture_size must be non-zero".into()));
        }
        let mut names = std::collections::HashSet::new();
        for entry in &self.pipelines {
            if !names.insert(entry.name.as_str()) {
                return Err(EngineError::Config(format!(
                    "pipeline '{}' is declared twice",
                    entry.name
                )));
            }

            // Every mesh slot needs a cull candidate
            let resolved = entry.pipeline.resolve();
            let mesh = &resolved.mesh;
            let mesh_slots = mesh.reserved_mesh_space / buffer_layouts::MESH_METADATA_SIZE;
            let candidate_slots = mesh.reserved_compute_space / buffer_layouts::DRAW_CANDIDATE_SIZE;
            if mesh.draw_mode == DrawMode::GpuIndirect && candidate_slots < mesh_slots {
                return Err(EngineError::Config(format!(
                    "pipeline '{}' reserves {} compute bytes for {} mesh slots; at least {} are needed",
                    entry.name,
                    mesh.reserved_compute_space,
                    mesh_slots,
                    mesh_slots * buffer_layouts::DRAW_CANDIDATE_SIZE
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.buffering, 3);
        assert_eq!(config.device_memory_budget, 512 * memory::MEGA_BYTE);
        assert_eq!(config.texture_size, textures::DEFAULT_TEXTURE_SIZE);
        assert!(config.pipelines.is_empty());
        assert_eq!(MeshPipelineConfig::default().draw_mode, DrawMode::Direct);
    }

    #[test]
    fn test_parse_pipelines_from_toml() {
        let config = RendererConfig::from_toml_str(
            r#"
            shader_directory = "assets/shaders"
            buffering = 2

            [[pipelines]]
            name = "props"
            [pipelines.pipeline]
            type = "color_mesh"
            reserved_vertex_space = 4096
            draw_mode = "gpu_indirect"

            [[pipelines]]
            name = "lines"
            [pipelines.pipeline]
            type = "vertex_mesh"
            topology = "line_list"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.buffering, 2);
        assert_eq!(config.pipelines.len(), 2);

        let props = config.pipelines[0].pipeline.resolve();
        assert_eq!(props.kind, MeshKind::Color);
        assert!(props.indexed);
        assert_eq!(props.shader, shaders::COLOR_MESH);
        assert_eq!(props.mesh.reserved_vertex_space, 4096);
        assert_eq!(props.mesh.draw_mode, DrawMode::GpuIndirect);
        assert_eq!(props.mesh.reserved_index_space, memory::DEFAULT_INDEX_SPACE);

        let lines = config.pipelines[1].pipeline.resolve();
        assert_eq!(lines.kind, MeshKind::Vertex);
        assert!(!lines.indexed);
        assert_eq!(lines.mesh.topology, Topology::LineList);
    }

    #[test]
    fn test_rejects_zero_buffering() {
        assert!(matches!(
            RendererConfig::from_toml_str("buffering = 0"),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_pipeline_names() {
        let source = r#"
            [[pipelines]]
            name = "a"
            [pipelines.pipeline]
            type = "color_mesh"

            [[pipelines]]
            name = "a"
            [pipelines.pipeline]
            type = "texture_mesh"
        "#;
        assert!(RendererConfig::from_toml_str(source).is_err());
    }

    #[test]
    fn test_rejects_compute_space_smaller_than_mesh_space() {
        let source = r#"
            [[pipelines]]
            name = "props"
            [pipelines.pipeline]
            type = "vertex_mesh"
            draw_mode = "gpu_indirect"
            reserved_mesh_space = 4096
            reserved_compute_space = 64
        "#;
        assert!(matches!(
            RendererConfig::from_toml_str(source),
            Err(EngineError::Config(_))
        ));

        // Direct pipelines never use the candidate arena
        let direct = source.replace("gpu_indirect", "direct");
        assert!(RendererConfig::from_toml_str(&direct).is_ok());
    }

    #[test]
    fn test_file_relative_shader_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("renderer.toml");
        fs::write(&path, "shader_directory = \"shaders\"\n").expect("write");

        let config = RendererConfig::from_toml_file(&path).expect("load");
        assert_eq!(config.shader_directory, dir.path().join("shaders"));
    }

    #[test]
    fn test_shader_override() {
        let config = PipelineConfig::TextureMesh(MeshPipelineConfig {
            shader: Some("custom.wgsl".into()),
            ..Default::default()
        });
        let resolved = config.resolve();
        assert_eq!(resolved.kind, MeshKind::Texture);
        assert_eq!(resolved.shader, "custom.wgsl");
        assert_eq!(resolved.cull_shader, shaders::CULL);
    }
}
