//! Renderable objects as seen by the mesh pipelines
//!
//! Pipelines only talk to [`MeshSource`]; [`Renderable`] is the stock
//! implementation used by the demo and tests.

use crate::constants::buffer_layouts::{INDEX_SIZE, NO_TEXTURE, VERTEX_SIZE};
use crate::gpu::buffer_layouts::Vertex;
use cgmath::{InnerSpace, Matrix4, SquareMatrix, Vector3, Vector4};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sphere enclosing an object, in world space when returned by a mesh source
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingSphere {
    pub center: Vector3<f32>,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: [f32; 3], radius: f32) -> Self {
        Self {
            center: center.into(),
            radius,
        }
    }

    /// Sphere tightly enough around `vertices`: box center, farthest vertex radius
    pub fn from_vertices<'a>(vertices: impl IntoIterator<Item = &'a Vertex> + Clone) -> Self {
        let mut min = Vector3::new(f32::MAX, f32::MAX, f32::MAX);
        let mut max = Vector3::new(f32::MIN, f32::MIN, f32::MIN);
        let mut any = false;
        for v in vertices.clone() {
            any = true;
            min.x = min.x.min(v.position[0]);
            min.y = min.y.min(v.position[1]);
            min.z = min.z.min(v.position[2]);
            max.x = max.x.max(v.position[0]);
            max.y = max.y.max(v.position[1]);
            max.z = max.z.max(v.position[2]);
        }
        if !any {
            return Self::new([0.0; 3], 0.0);
        }

        let center = (min + max) * 0.5;
        let radius = vertices
            .into_iter()
            .map(|v| (Vector3::from(v.position) - center).magnitude())
            .fold(0.0f32, f32::max);
        Self { center, radius }
    }

    /// Transform into the space of `matrix`, scaling the radius by the largest axis scale
    pub fn transformed(&self, matrix: &Matrix4<f32>) -> Self {
        let c = matrix * Vector4::new(self.center.x, self.center.y, self.center.z, 1.0);
        let scale = matrix
            .x
            .truncate()
            .magnitude()
            .max(matrix.y.truncate().magnitude())
            .max(matrix.z.truncate().magnitude());
        Self {
            center: c.truncate(),
            radius: self.radius * scale,
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.center.x, self.center.y, self.center.z, self.radius]
    }

    pub fn from_array(values: [f32; 4]) -> Self {
        Self::new([values[0], values[1], values[2]], values[3])
    }
}

/// Color or texture reference carried per mesh
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MaterialRef {
    Color([f32; 4]),
    Texture(u32),
}

impl MaterialRef {
    pub fn color(&self) -> [f32; 4] {
        match self {
            MaterialRef::Color(color) => *color,
            MaterialRef::Texture(_) => [1.0; 4],
        }
    }

    pub fn texture_index(&self) -> u32 {
        match self {
            MaterialRef::Color(_) => NO_TEXTURE,
            MaterialRef::Texture(index) => *index,
        }
    }
}

impl Default for MaterialRef {
    fn default() -> Self {
        MaterialRef::Color([1.0; 4])
    }
}

/// Geometry of one mesh
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material: MaterialRef,
}

impl Mesh {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>, material: MaterialRef) -> Self {
        Self {
            vertices,
            indices,
            material,
        }
    }

    pub fn vertex_bytes(&self) -> u64 {
        self.vertices.len() as u64 * VERTEX_SIZE
    }

    pub fn index_bytes(&self) -> u64 {
        self.indices.len() as u64 * INDEX_SIZE
    }
}

/// Anything a mesh pipeline can register and draw
pub trait MeshSource: Send + Sync {
    fn name(&self) -> &str;

    /// Ordered meshes; one draw per mesh
    fn meshes(&self) -> &[Mesh];

    /// World-space bounding sphere; radius 0 disables culling for the object
    fn bounding_sphere(&self) -> BoundingSphere;

    fn matrix(&self) -> Matrix4<f32>;

    fn is_dirty(&self) -> bool;
    fn set_dirty(&self, dirty: bool);

    fn has_been_registered(&self) -> bool;
    fn flag_as_registered(&self);
}

/// Mesh source with a mutable transform
pub struct Renderable {
    name: String,
    meshes: Vec<Mesh>,
    local_sphere: BoundingSphere,
    transform: RwLock<Matrix4<f32>>,
    dirty: AtomicBool,
    registered: AtomicBool,
}

impl Renderable {
    pub fn new(name: impl Into<String>, meshes: Vec<Mesh>) -> Self {
        let local_sphere =
            BoundingSphere::from_vertices(meshes.iter().flat_map(|m| m.vertices.iter()));
        Self {
            name: name.into(),
            meshes,
            local_sphere,
            transform: RwLock::new(Matrix4::identity()),
            dirty: AtomicBool::new(false),
            registered: AtomicBool::new(false),
        }
    }

    /// Override the computed local sphere
    pub fn with_local_sphere(mut self, sphere: BoundingSphere) -> Self {
        self.local_sphere = sphere;
        self
    }

    pub fn with_matrix(self, matrix: Matrix4<f32>) -> Self {
        *self.transform.write() = matrix;
        self
    }

    /// Replace the transform and mark the object dirty
    pub fn set_matrix(&self, matrix: Matrix4<f32>) {
        *self.transform.write() = matrix;
        self.dirty.store(true, Ordering::Release);
    }

    pub fn set_position(&self, position: Vector3<f32>) {
        self.set_matrix(Matrix4::from_translation(position));
    }

    pub fn local_sphere(&self) -> BoundingSphere {
        self.local_sphere
    }
}

impl MeshSource for Renderable {
    fn name(&self) -> &str {
        &self.name
    }

    fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    fn bounding_sphere(&self) -> BoundingSphere {
        self.local_sphere.transformed(&self.transform.read())
    }

    fn matrix(&self) -> Matrix4<f32> {
        *self.transform.read()
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    fn has_been_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    fn flag_as_registered(&self) {
        self.registered.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Renderable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderable")
            .field("name", &self.name)
            .field("meshes", &self.meshes.len())
            .field("dirty", &self.is_dirty())
            .field("registered", &self.has_been_registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Mesh {
        Mesh::new(
            vec![
                Vertex::at([-1.0, 0.0, -1.0]),
                Vertex::at([1.0, 0.0, -1.0]),
                Vertex::at([1.0, 0.0, 1.0]),
                Vertex::at([-1.0, 0.0, 1.0]),
            ],
            vec![0, 1, 2, 2, 3, 0],
            MaterialRef::Color([0.2, 0.4, 0.6, 1.0]),
        )
    }

    #[test]
    fn test_sphere_from_vertices() {
        let sphere = BoundingSphere::from_vertices(quad().vertices.iter());
        assert_eq!(sphere.center, Vector3::new(0.0, 0.0, 0.0));
        assert!((sphere.radius - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_empty_mesh_has_zero_radius() {
        let sphere = BoundingSphere::from_vertices(std::iter::empty::<&Vertex>());
        assert_eq!(sphere.radius, 0.0);
    }

    #[test]
    fn test_world_sphere_follows_transform() {
        let renderable = Renderable::new("quad", vec![quad()]);
        renderable.set_matrix(
            Matrix4::from_translation(Vector3::new(5.0, 0.0, 0.0)) * Matrix4::from_scale(2.0),
        );
        let sphere = renderable.bounding_sphere();
        assert!((sphere.center.x - 5.0).abs() < 1e-6);
        assert!((sphere.radius - 2.0 * 2.0f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_set_matrix_marks_dirty() {
        let renderable = Renderable::new("quad", vec![quad()]);
        assert!(!renderable.is_dirty());
        renderable.set_position(Vector3::new(0.0, 1.0, 0.0));
        assert!(renderable.is_dirty());
        renderable.set_dirty(false);
        assert!(!renderable.is_dirty());
    }

    #[test]
    fn test_material_ref_encoding() {
        assert_eq!(MaterialRef::Texture(3).texture_index(), 3);
        assert_eq!(MaterialRef::Texture(3).color(), [1.0; 4]);
        assert_eq!(MaterialRef::Color([0.5; 4]).texture_index(), NO_TEXTURE);
    }
}
