//! Camera collaborator
//!
//! The renderer only needs frustum planes and the view/projection pair, so it
//! consumes cameras through `FrustumSource`. `Camera` is a plain perspective
//! camera good enough for the demo and tests.

pub mod frustum;

pub use frustum::{FrustumPlanes, Plane};

use cgmath::{perspective, Deg, InnerSpace, Matrix4, Point3, Vector3};

/// cgmath produces OpenGL clip space (z in -1..1); wgpu expects 0..1
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

pub trait FrustumSource: Send + Sync {
    fn view_matrix(&self) -> Matrix4<f32>;

    /// OpenGL-convention projection; the GPU uniform applies the depth remap
    fn projection_matrix(&self) -> Matrix4<f32>;

    fn eye_position(&self) -> Point3<f32>;

    fn frustum_planes(&self) -> FrustumPlanes {
        FrustumPlanes::from_view_projection(&(self.projection_matrix() * self.view_matrix()))
    }
}

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Point3<f32>,
    pub yaw: Deg<f32>,
    pub pitch: Deg<f32>,
    aspect: f32,
    fovy: Deg<f32>,
    znear: f32,
    zfar: f32,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            position: Point3::new(0.0, 0.0, 10.0),
            yaw: Deg(-90.0),
            pitch: Deg(0.0),
            aspect: width as f32 / height.max(1) as f32,
            fovy: Deg(45.0),
            znear: 0.1,
            zfar: 1000.0,
        }
    }

    pub fn with_clip_planes(mut self, znear: f32, zfar: f32) -> Self {
        self.znear = znear;
        self.zfar = zfar;
        self
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    /// Point the camera at `target` from its current position
    pub fn look_at(&mut self, target: Point3<f32>) {
        let dir = (target - self.position).normalize();
        self.pitch = Deg::from(cgmath::Rad(dir.y.asin()));
        self.yaw = Deg::from(cgmath::Rad(dir.z.atan2(dir.x)));
    }

    pub fn forward(&self) -> Vector3<f32> {
        let (sin_yaw, cos_yaw) = cgmath::Rad::from(self.yaw).0.sin_cos();
        let (sin_pitch, cos_pitch) = cgmath::Rad::from(self.pitch).0.sin_cos();
        Vector3::new(cos_pitch * cos_yaw, sin_pitch, cos_pitch * sin_yaw)
    }
}

impl FrustumSource for Camera {
    fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.position, self.position + self.forward(), Vector3::unit_y())
    }

    fn projection_matrix(&self) -> Matrix4<f32> {
        perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }

    fn eye_position(&self) -> Point3<f32> {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::BoundingSphere;

    #[test]
    fn test_default_camera_sees_origin() {
        let camera = Camera::new(800, 600);
        let frustum = camera.frustum_planes();
        assert!(frustum.intersects_sphere(&BoundingSphere::new([0.0, 0.0, 0.0], 1.0)));
        assert!(!frustum.intersects_sphere(&BoundingSphere::new([0.0, 0.0, 50.0], 1.0)));
    }

    #[test]
    fn test_look_at_turns_camera() {
        let mut camera = Camera::new(800, 600);
        camera.look_at(Point3::new(10.0, 0.0, 10.0));
        let forward = camera.forward();
        assert!(forward.x > 0.99);
        assert!(forward.y.abs() < 1e-5);
    }
}
