//! Camera and culling uniform layouts

use crate::camera::{FrustumPlanes, FrustumSource, OPENGL_TO_WGPU_MATRIX};
use bytemuck::{Pod, Zeroable};

/// Camera uniform bound at group 0 of every mesh pipeline
/// Total size: 80 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub position: [f32; 4],
}

impl CameraUniform {
    pub fn from_source(camera: &dyn FrustumSource) -> Self {
        let view_proj = OPENGL_TO_WGPU_MATRIX * camera.projection_matrix() * camera.view_matrix();
        let eye = camera.eye_position();
        Self {
            view_proj: view_proj.into(),
            position: [eye.x, eye.y, eye.z, 1.0],
        }
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        use cgmath::SquareMatrix;
        Self {
            view_proj: cgmath::Matrix4::identity().into(),
            position: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Cull pass parameters
/// Total size: 112 bytes
///
/// Memory layout:
/// - Offset 0-95: six normalized planes (xyz normal, w distance)
/// - Offset 96-99: candidate count
/// - Offset 100-103: 1 when the target array holds indexed commands
/// - Offset 104-111: padding
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CullUniforms {
    pub planes: [[f32; 4]; 6],
    pub candidate_count: u32,
    pub indexed: u32,
    _padding: [u32; 2],
}

impl CullUniforms {
    pub fn new(planes: &FrustumPlanes, candidate_count: u32, indexed: bool) -> Self {
        Self {
            planes: planes.to_arrays(),
            candidate_count,
            indexed: indexed as u32,
            _padding: [0; 2],
        }
    }

    pub fn frustum(&self) -> FrustumPlanes {
        FrustumPlanes::from_arrays(self.planes)
    }
}
