//! Owned store of RGBA textures sampled by `texture_mesh` pipelines
//!
//! Images are handed in already decoded. Every image becomes one layer of a
//! square texture array, so they all share the registry's layer size. The
//! index returned by [`TextureRegistry::register`] is what
//! [`super::MaterialRef::Texture`] refers to.

use crate::constants::textures::{DEFAULT_TEXTURE_SIZE, MAX_TEXTURE_LAYERS};
use crate::error::{EngineError, EngineResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One decoded image, 8 bits per channel, rows top to bottom
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureImage {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureImage {
    /// Single-colour image, used as the layer bound when nothing is registered
    pub fn solid(name: impl Into<String>, size: u32, rgba: [u8; 4]) -> Self {
        let texels = size as usize * size as usize;
        Self {
            name: name.into(),
            width: size,
            height: size,
            rgba: rgba.iter().copied().cycle().take(texels * 4).collect(),
        }
    }
}

#[derive(Default)]
struct TextureInner {
    images: Vec<Arc<TextureImage>>,
    by_name: HashMap<String, u32>,
}

pub struct TextureRegistry {
    layer_size: u32,
    inner: RwLock<TextureInner>,
    /// Bumped on every successful registration
    revision: AtomicU64,
}

impl Default for TextureRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TEXTURE_SIZE)
    }
}

impl TextureRegistry {
    pub fn new(layer_size: u32) -> Self {
        Self {
            layer_size,
            inner: RwLock::new(TextureInner::default()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn layer_size(&self) -> u32 {
        self.layer_size
    }

    /// Store `rgba` under `name` and return its texture index
    pub fn register(&self, name: impl Into<String>, width: u32, height: u32, rgba: Vec<u8>) -> EngineResult<u32> {
        let name = name.into();
        let rejected = |reason: String| EngineError::TextureRejected {
            name: name.clone(),
            reason,
        };

        if width != self.layer_size || height != self.layer_size {
            return Err(rejected(format!(
                "{}x{} does not match the {}x{} layer size",
                width, height, self.layer_size, self.layer_size
            )));
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(rejected(format!("expected {} RGBA bytes, got {}", expected, rgba.len())));
        }

        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&name) {
            return Err(rejected("name is already registered".into()));
        }
        let index = inner.images.len() as u32;
        if index >= MAX_TEXTURE_LAYERS {
            return Err(rejected(format!("registry is full ({} layers)", MAX_TEXTURE_LAYERS)));
        }

        inner.by_name.insert(name.clone(), index);
        inner.images.push(Arc::new(TextureImage {
            name,
            width,
            height,
            rgba,
        }));
        self.revision.fetch_add(1, Ordering::AcqRel);
        log::debug!("[TextureRegistry::register] Layer {} of {}", index, inner.images.len());
        Ok(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<TextureImage>> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .and_then(|&index| inner.images.get(index as usize).cloned())
    }

    pub fn get_by_index(&self, index: u32) -> Option<Arc<TextureImage>> {
        self.inner.read().images.get(index as usize).cloned()
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Every image in index order
    pub fn images(&self) -> Vec<Arc<TextureImage>> {
        self.inner.read().images.clone()
    }
}
