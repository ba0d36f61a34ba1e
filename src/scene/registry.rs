//! Owned registry of renderables
//!
//! Replaces a process-wide object store: the application creates one registry,
//! registers objects into it and hands references to whoever needs lookups.

use super::MeshSource;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct RegistryInner {
    objects: Vec<Arc<dyn MeshSource>>,
    by_name: HashMap<String, usize>,
}

#[derive(Default)]
pub struct RenderableRegistry {
    inner: RwLock<RegistryInner>,
}

impl RenderableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object under its name and flag it as registered.
    ///
    /// Returns the registration index, or `None` if the name is taken.
    pub fn register(&self, object: Arc<dyn MeshSource>) -> Option<usize> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(object.name()) {
            log::warn!(
                "[RenderableRegistry::register] '{}' is already registered",
                object.name()
            );
            return None;
        }

        let index = inner.objects.len();
        inner.by_name.insert(object.name().to_string(), index);
        object.flag_as_registered();
        inner.objects.push(object);
        Some(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn MeshSource>> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .and_then(|&index| inner.objects.get(index).cloned())
    }

    pub fn get_by_index(&self, index: usize) -> Option<Arc<dyn MeshSource>> {
        self.inner.read().objects.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every object in registration order
    pub fn all(&self) -> Vec<Arc<dyn MeshSource>> {
        self.inner.read().objects.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Renderable;

    #[test]
    fn test_register_and_lookup() {
        let registry = RenderableRegistry::new();
        let a: Arc<dyn MeshSource> = Arc::new(Renderable::new("a", vec![]));
        let b: Arc<dyn MeshSource> = Arc::new(Renderable::new("b", vec![]));

        assert!(!a.has_been_registered());
        assert_eq!(registry.register(a.clone()), Some(0));
        assert_eq!(registry.register(b), Some(1));
        assert!(a.has_been_registered());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get_by_name("b").map(|o| o.name().to_string()), Some("b".into()));
        assert_eq!(registry.get_by_index(0).map(|o| o.name().to_string()), Some("a".into()));
        assert!(registry.get_by_index(2).is_none());
        assert!(registry.get_by_name("c").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = RenderableRegistry::new();
        registry.register(Arc::new(Renderable::new("dup", vec![])));
        let second = Arc::new(Renderable::new("dup", vec![]));
        assert_eq!(registry.register(second.clone()), None);
        assert!(!second.has_been_registered());
        assert_eq!(registry.len(), 1);
    }
}
