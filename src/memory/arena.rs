//! Fixed-capacity, append-only GPU buffer
//!
//! An arena owns one backend buffer and a content cursor. Capacity and tier are
//! settled at creation; afterwards the only mutations are appends at the cursor,
//! in-place rewrites below it, and cursor resets.

use super::budget::DeviceMemoryBudget;
use super::staging::StagingUploader;
use super::ArenaUsage;
use crate::constants::memory::COPY_ALIGNMENT;
use crate::error::{missing_prerequisite, EngineError, EngineResult};
use crate::gpu::{AllocationFailure, BufferRequest, BufferRole, GpuBackend, MemoryTier};
use std::sync::Arc;

pub struct BufferArena<B: GpuBackend> {
    label: String,
    role: BufferRole,
    capacity: u64,
    content_size: u64,
    tier: MemoryTier,
    buffer: Option<Arc<B::Buffer>>,
    backend: Arc<B>,
    budget: Arc<DeviceMemoryBudget>,
    /// Bytes held in `budget` on behalf of this arena
    reserved: u64,
}

impl<B: GpuBackend> BufferArena<B> {
    /// Allocate `capacity` bytes, preferring device-local memory when asked.
    ///
    /// Device-local exhaustion (budget or device) falls back to host-visible
    /// once; only a failed host-visible allocation is an error.
    pub fn create(
        backend: Arc<B>,
        budget: Arc<DeviceMemoryBudget>,
        label: impl Into<String>,
        role: BufferRole,
        capacity: u64,
        prefer_device_local: bool,
    ) -> EngineResult<Self> {
        let label = label.into();
        if capacity == 0 {
            return Err(EngineError::ZeroCapacityRequested { arena: label });
        }

        let limit = backend.limits().max_buffer_size;
        if capacity > limit {
            return Err(EngineError::CapacityExceedsLimit {
                arena: label,
                requested: capacity,
                limit,
            });
        }

        let mut arena = Self {
            label,
            role,
            capacity,
            content_size: 0,
            tier: MemoryTier::HostVisible,
            buffer: None,
            backend,
            budget,
            reserved: 0,
        };

        if prefer_device_local {
            match arena.allocate_device_local() {
                Ok(buffer) => {
                    arena.tier = MemoryTier::DeviceLocal;
                    arena.buffer = Some(Arc::new(buffer));
                }
                Err(error) => {
                    log::warn!(
                        "[BufferArena::create] '{}': {}; falling back to host-visible memory",
                        arena.label,
                        error
                    );
                }
            }
        }

        if arena.buffer.is_none() {
            let buffer = arena
                .backend
                .create_buffer(&BufferRequest {
                    label: &arena.label,
                    size: capacity,
                    role,
                    tier: MemoryTier::HostVisible,
                })
                .map_err(|failure| EngineError::HostAllocationFailed {
                    arena: arena.label.clone(),
                    size: capacity,
                    reason: failure.to_string(),
                })?;
            arena.buffer = Some(Arc::new(buffer));
        }

        log::info!(
            "[BufferArena::create] '{}' {} bytes ({})",
            arena.label,
            capacity,
            arena.tier
        );
        Ok(arena)
    }

    fn allocate_device_local(&mut self) -> EngineResult<B::Buffer> {
        if !self.budget.try_reserve(self.capacity) {
            return Err(EngineError::DeviceLocalOutOfMemory {
                requested: self.capacity,
                available: self.budget.available(),
            });
        }

        let request = BufferRequest {
            label: &self.label,
            size: self.capacity,
            role: self.role,
            tier: MemoryTier::DeviceLocal,
        };
        match self.backend.create_buffer(&request) {
            Ok(buffer) => {
                self.reserved = self.capacity;
                Ok(buffer)
            }
            Err(failure) => {
                self.budget.release(self.capacity);
                if let AllocationFailure::Rejected(reason) = &failure {
                    log::debug!("[BufferArena::create] Device rejected '{}': {}", self.label, reason);
                }
                Err(EngineError::DeviceLocalOutOfMemory {
                    requested: self.capacity,
                    available: self.budget.available(),
                })
            }
        }
    }

    /// Append `data` at the content cursor. Returns false without mutating
    /// anything if the arena is destroyed, the bytes do not fit, or the write
    /// itself fails.
    pub fn append(&mut self, data: &[u8]) -> bool {
        let offset = self.content_size;
        let len = data.len() as u64;

        if len > self.remaining() {
            log::warn!(
                "[BufferArena::append] {}",
                EngineError::CapacityOverflowOnAppend {
                    arena: self.label.clone(),
                    requested: len,
                    remaining: self.remaining(),
                }
            );
            return false;
        }

        if !self.write(offset, data) {
            return false;
        }
        self.content_size += len;
        true
    }

    /// Rewrite bytes that are already inside the content range
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> bool {
        let end = offset.saturating_add(data.len() as u64);
        if end > self.content_size {
            log::warn!(
                "[BufferArena::write_at] '{}': range {}..{} is outside content size {}",
                self.label,
                offset,
                end,
                self.content_size
            );
            return false;
        }
        self.write(offset, data)
    }

    fn write(&self, offset: u64, data: &[u8]) -> bool {
        let Some(buffer) = self.buffer.as_deref() else {
            log::warn!(
                "[BufferArena::write] {}",
                missing_prerequisite(format!("backing buffer of '{}'", self.label))
            );
            return false;
        };
        if data.is_empty() {
            return true;
        }
        if offset % COPY_ALIGNMENT != 0 || data.len() as u64 % COPY_ALIGNMENT != 0 {
            log::error!(
                "[BufferArena::write] '{}': {} bytes at {} are not {}-byte aligned",
                self.label,
                data.len(),
                offset,
                COPY_ALIGNMENT
            );
            return false;
        }

        match self.tier {
            MemoryTier::HostVisible => {
                self.backend.write_buffer(buffer, offset, data);
                true
            }
            MemoryTier::DeviceLocal => {
                match StagingUploader::new(self.backend.as_ref()).upload(&self.label, buffer, offset, data) {
                    Ok(()) => true,
                    Err(error) => {
                        log::error!("[BufferArena::write] {}", error);
                        false
                    }
                }
            }
        }
    }

    /// Forget all content; capacity, tier and stored bytes are kept
    pub fn reset(&mut self) {
        self.content_size = 0;
    }

    /// Move the cursor back to `size`, used to undo a partially applied batch
    pub fn truncate(&mut self, size: u64) {
        self.content_size = self.content_size.min(size);
    }

    /// Release the backing buffer and any budget reservation
    pub fn destroy(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.backend.destroy_buffer(&buffer);
            log::debug!("[BufferArena::destroy] '{}' released", self.label);
        }
        if self.reserved > 0 {
            self.budget.release(self.reserved);
            self.reserved = 0;
        }
        self.content_size = 0;
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn content_size(&self) -> u64 {
        self.content_size
    }

    pub fn remaining(&self) -> u64 {
        self.capacity - self.content_size
    }

    pub fn tier(&self) -> MemoryTier {
        self.tier
    }

    pub fn is_empty(&self) -> bool {
        self.content_size == 0
    }

    pub fn is_destroyed(&self) -> bool {
        self.buffer.is_none()
    }

    /// Shared handle for binding; `None` once destroyed
    pub fn buffer(&self) -> Option<&Arc<B::Buffer>> {
        self.buffer.as_ref()
    }

    pub fn usage(&self) -> ArenaUsage {
        ArenaUsage {
            label: self.label.clone(),
            capacity: self.capacity,
            used: self.content_size,
            tier: self.tier,
        }
    }
}

impl<B: GpuBackend> Drop for BufferArena<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessBackend;

    fn arena(
        backend: &Arc<HeadlessBackend>,
        budget: &Arc<DeviceMemoryBudget>,
        capacity: u64,
        device_local: bool,
    ) -> EngineResult<BufferArena<HeadlessBackend>> {
        BufferArena::create(
            backend.clone(),
            budget.clone(),
            "test arena",
            BufferRole::Vertex,
            capacity,
            device_local,
        )
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let backend = Arc::new(HeadlessBackend::new());
        let budget = Arc::new(DeviceMemoryBudget::new(1024));
        assert!(matches!(
            arena(&backend, &budget, 0, true),
            Err(EngineError::ZeroCapacityRequested { .. })
        ));
    }

    #[test]
    fn test_capacity_over_device_limit_is_rejected() {
        let backend = Arc::new(HeadlessBackend::new().with_limits(crate::gpu::BackendLimits {
            max_buffer_size: 64,
            ..Default::default()
        }));
        let budget = Arc::new(DeviceMemoryBudget::new(1024));
        assert!(matches!(
            arena(&backend, &budget, 128, false),
            Err(EngineError::CapacityExceedsLimit { limit: 64, .. })
        ));
    }

    #[test]
    fn test_device_local_reserves_budget() {
        let backend = Arc::new(HeadlessBackend::new());
        let budget = Arc::new(DeviceMemoryBudget::new(1024));
        let mut arena = arena(&backend, &budget, 256, true).expect("arena");
        assert_eq!(arena.tier(), MemoryTier::DeviceLocal);
        assert_eq!(budget.used(), 256);

        arena.destroy();
        arena.destroy();
        assert_eq!(budget.used(), 0);
        assert!(arena.is_destroyed());
    }

    #[test]
    fn test_budget_shortfall_falls_back_to_host_visible() {
        let backend = Arc::new(HeadlessBackend::new());
        let budget = Arc::new(DeviceMemoryBudget::new(0));
        let arena = arena(&backend, &budget, 256, true).expect("arena");
        assert_eq!(arena.tier(), MemoryTier::HostVisible);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn test_device_oom_releases_reservation_and_falls_back() {
        let backend = Arc::new(HeadlessBackend::new().with_device_local_capacity(64));
        let budget = Arc::new(DeviceMemoryBudget::new(1024));
        let arena = arena(&backend, &budget, 256, true).expect("arena");
        assert_eq!(arena.tier(), MemoryTier::HostVisible);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn test_host_failure_is_fatal() {
        let backend = Arc::new(HeadlessBackend::new().with_host_capacity(16));
        let budget = Arc::new(DeviceMemoryBudget::new(0));
        assert!(matches!(
            arena(&backend, &budget, 256, true),
            Err(EngineError::HostAllocationFailed { .. })
        ));
    }

    #[test]
    fn test_append_host_visible_writes_in_place() {
        let backend = Arc::new(HeadlessBackend::new());
        let budget = Arc::new(DeviceMemoryBudget::new(0));
        let mut arena = arena(&backend, &budget, 16, false).expect("arena");

        assert!(arena.append(&[1, 2, 3, 4]));
        assert!(arena.append(&[5, 6, 7, 8]));
        assert_eq!(arena.content_size(), 8);

        let buffer = arena.buffer().expect("buffer").clone();
        assert_eq!(&buffer.contents()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(backend.stats().staging_copies, 0);
    }

    #[test]
    fn test_append_device_local_goes_through_staging() {
        let backend = Arc::new(HeadlessBackend::new());
        let budget = Arc::new(DeviceMemoryBudget::new(1024));
        let mut arena = arena(&backend, &budget, 16, true).expect("arena");

        assert!(arena.append(&[1, 2, 3, 4]));
        assert_eq!(backend.stats().staging_copies, 1);
        assert_eq!(backend.stats().fence_waits, 1);
        assert_eq!(&arena.buffer().expect("buffer").contents()[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_overflow_leaves_arena_untouched() {
        let backend = Arc::new(HeadlessBackend::new());
        let budget = Arc::new(DeviceMemoryBudget::new(0));
        let mut arena = arena(&backend, &budget, 8, false).expect("arena");

        assert!(arena.append(&[1; 8]));
        assert!(!arena.append(&[2; 4]));
        assert_eq!(arena.content_size(), 8);
        assert_eq!(arena.buffer().expect("buffer").contents(), vec![1; 8]);
    }

    #[test]
    fn test_append_after_destroy_fails() {
        let backend = Arc::new(HeadlessBackend::new());
        let budget = Arc::new(DeviceMemoryBudget::new(0));
        let mut arena = arena(&backend, &budget, 8, false).expect("arena");
        arena.destroy();
        assert!(!arena.append(&[1; 4]));
        assert_eq!(arena.content_size(), 0);
    }

    #[test]
    fn test_write_at_stays_inside_content() {
        let backend = Arc::new(HeadlessBackend::new());
        let budget = Arc::new(DeviceMemoryBudget::new(0));
        let mut arena = arena(&backend, &budget, 16, false).expect("arena");
        assert!(arena.append(&[0; 8]));

        assert!(arena.write_at(4, &[9; 4]));
        assert!(!arena.write_at(8, &[9; 4]));
        assert_eq!(&arena.buffer().expect("buffer").contents()[..8], &[0, 0, 0, 0, 9, 9, 9, 9]);
    }

    #[test]
    fn test_reset_and_truncate() {
        let backend = Arc::new(HeadlessBackend::new());
        let budget = Arc::new(DeviceMemoryBudget::new(0));
        let mut arena = arena(&backend, &budget, 16, false).expect("arena");
        assert!(arena.append(&[1; 12]));

        arena.truncate(4);
        assert_eq!(arena.content_size(), 4);
        arena.truncate(8);
        assert_eq!(arena.content_size(), 4);

        arena.reset();
        arena.reset();
        assert!(arena.is_empty());
        assert_eq!(arena.capacity(), 16);
        assert!(!arena.is_destroyed());
    }

    #[test]
    fn test_drop_returns_budget() {
        let backend = Arc::new(HeadlessBackend::new());
        let budget = Arc::new(DeviceMemoryBudget::new(1024));
        {
            let _arena = arena(&backend, &budget, 512, true).expect("arena");
            assert_eq!(budget.used(), 512);
        }
        assert_eq!(budget.used(), 0);
        assert_eq!(backend.device_local_in_use(), 0);
    }
}
