//! Frustum planes and the sphere visibility test shared by the direct draw path
//! and the CPU emulation of the cull shader.

use crate::constants::culling::FRUSTUM_PLANE_COUNT;
use crate::scene::BoundingSphere;
use cgmath::{InnerSpace, Matrix, Matrix4, Vector3, Vector4};

/// Plane `dot(normal, p) + distance = 0`, normal pointing into the frustum
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f32>,
    pub distance: f32,
}

impl Plane {
    /// Normalize a raw `(a, b, c, d)` plane; degenerate planes are kept as-is
    pub fn from_coefficients(raw: Vector4<f32>) -> Self {
        let normal = raw.truncate();
        let length = normal.magnitude();
        if length <= f32::EPSILON {
            return Self {
                normal,
                distance: raw.w,
            };
        }
        Self {
            normal: normal / length,
            distance: raw.w / length,
        }
    }

    #[inline]
    pub fn signed_distance(&self, point: Vector3<f32>) -> f32 {
        self.normal.dot(point) + self.distance
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.normal.x, self.normal.y, self.normal.z, self.distance]
    }
}

/// The six frustum planes: left, right, bottom, top, near, far
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrustumPlanes {
    pub planes: [Plane; FRUSTUM_PLANE_COUNT],
}

impl FrustumPlanes {
    /// Gribb/Hartmann extraction from an OpenGL-convention view-projection
    pub fn from_view_projection(view_proj: &Matrix4<f32>) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        Self {
            planes: [
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 + r1),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(r3 + r2),
                Plane::from_coefficients(r3 - r2),
            ],
        }
    }

    /// A frustum every sphere passes
    pub fn infinite() -> Self {
        let plane = Plane {
            normal: Vector3::new(0.0, 0.0, 0.0),
            distance: 1.0,
        };
        Self {
            planes: [plane; FRUSTUM_PLANE_COUNT],
        }
    }

    /// Visible unless the sphere lies fully behind one plane.
    /// A zero radius marks an object that is never culled.
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        if sphere.radius == 0.0 {
            return true;
        }
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(sphere.center) + sphere.radius >= 0.0)
    }

    pub fn to_arrays(&self) -> [[f32; 4]; FRUSTUM_PLANE_COUNT] {
        let mut out = [[0.0; 4]; FRUSTUM_PLANE_COUNT];
        for (dst, plane) in out.iter_mut().zip(self.planes.iter()) {
            *dst = plane.to_array();
        }
        out
    }

    pub fn from_arrays(values: [[f32; 4]; FRUSTUM_PLANE_COUNT]) -> Self {
        let mut planes = [Plane {
            normal: Vector3::new(0.0, 0.0, 0.0),
            distance: 0.0,
        }; FRUSTUM_PLANE_COUNT];
        for (plane, raw) in planes.iter_mut().zip(values.iter()) {
            *plane = Plane {
                normal: Vector3::new(raw[0], raw[1], raw[2]),
                distance: raw[3],
            };
        }
        Self { planes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{perspective, Deg, Point3};

    fn looking_down_negative_z() -> FrustumPlanes {
        let view = Matrix4::look_at_rh(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, -1.0),
            Vector3::unit_y(),
        );
        let proj = perspective(Deg(90.0), 1.0, 0.1, 100.0);
        FrustumPlanes::from_view_projection(&(proj * view))
    }

    #[test]
    fn test_planes_are_normalized() {
        let frustum = looking_down_negative_z();
        for plane in frustum.planes.iter() {
            assert!((plane.normal.magnitude() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_sphere_in_front_is_visible() {
        let frustum = looking_down_negative_z();
        assert!(frustum.intersects_sphere(&BoundingSphere::new([0.0, 0.0, -10.0], 1.0)));
    }

    #[test]
    fn test_sphere_behind_is_culled() {
        let frustum = looking_down_negative_z();
        assert!(!frustum.intersects_sphere(&BoundingSphere::new([0.0, 0.0, 10.0], 1.0)));
    }

    #[test]
    fn test_sphere_beyond_far_plane_is_culled() {
        let frustum = looking_down_negative_z();
        assert!(!frustum.intersects_sphere(&BoundingSphere::new([0.0, 0.0, -200.0], 1.0)));
    }

    #[test]
    fn test_sphere_straddling_edge_is_visible() {
        let frustum = looking_down_negative_z();
        // 90 degree fov: the left plane passes through x = z at depth 10
        assert!(frustum.intersects_sphere(&BoundingSphere::new([-10.5, 0.0, -10.0], 1.0)));
        assert!(!frustum.intersects_sphere(&BoundingSphere::new([-20.0, 0.0, -10.0], 1.0)));
    }

    #[test]
    fn test_zero_radius_is_never_culled() {
        let frustum = looking_down_negative_z();
        assert!(frustum.intersects_sphere(&BoundingSphere::new([0.0, 0.0, 50_000.0], 0.0)));
    }

    #[test]
    fn test_array_conversion_preserves_planes() {
        let frustum = looking_down_negative_z();
        assert_eq!(FrustumPlanes::from_arrays(frustum.to_arrays()), frustum);
    }

    #[test]
    fn test_infinite_frustum_accepts_everything() {
        let frustum = FrustumPlanes::infinite();
        assert!(frustum.intersects_sphere(&BoundingSphere::new([1e6, -1e6, 1e6], 1.0)));
    }
}
