//! Frames-in-flight bookkeeping
//!
//! Each slot remembers the fence of the last frame submitted through it.
//! Starting a frame waits on that fence, which bounds how far the CPU can run
//! ahead of the GPU. The manager also owns the pause flag and the pending
//! rebuild request for surface-dependent state.

use crate::gpu::GpuBackend;
use std::sync::Arc;

#[derive(Debug)]
pub struct FrameSlot<F> {
    fence: Option<F>,
    submissions: u64,
}

impl<F> FrameSlot<F> {
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    pub fn is_in_flight(&self) -> bool {
        self.fence.is_some()
    }
}

pub struct FrameResourceManager<B: GpuBackend> {
    backend: Arc<B>,
    slots: Vec<FrameSlot<B::Fence>>,
    current: usize,
    requires_rebuild: bool,
    paused: bool,
    frames_submitted: u64,
}

impl<B: GpuBackend> FrameResourceManager<B> {
    /// `buffering` slots; zero is treated as one
    pub fn new(backend: Arc<B>, buffering: usize) -> Self {
        let slots = (0..buffering.max(1))
            .map(|_| FrameSlot {
                fence: None,
                submissions: 0,
            })
            .collect();
        Self {
            backend,
            slots,
            current: 0,
            requires_rebuild: false,
            paused: false,
            frames_submitted: 0,
        }
    }

    /// Wait until the current slot's previous submission has completed
    pub fn begin_frame(&mut self) {
        if let Some(fence) = self.slots[self.current].fence.take() {
            self.backend.wait(&fence);
        }
    }

    /// Remember the frame's fence and move to the next slot
    pub fn end_frame(&mut self, fence: B::Fence) {
        let slot = &mut self.slots[self.current];
        slot.fence = Some(fence);
        slot.submissions += 1;
        self.frames_submitted += 1;
        self.current = (self.current + 1) % self.slots.len();
    }

    pub fn request_rebuild(&mut self) {
        if !self.requires_rebuild {
            log::debug!("[FrameResourceManager::request_rebuild] Surface state will be rebuilt next frame");
        }
        self.requires_rebuild = true;
    }

    pub fn requires_rebuild(&self) -> bool {
        self.requires_rebuild
    }

    pub fn clear_rebuild(&mut self) {
        self.requires_rebuild = false;
    }

    /// Block until the device is idle. No-op while already paused.
    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        self.backend.wait_idle();
        for slot in &mut self.slots {
            slot.fence = None;
        }
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn buffering(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot<B::Fence>> {
        self.slots.get(index)
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessBackend;

    #[test]
    fn test_slots_rotate() {
        let backend = Arc::new(HeadlessBackend::new());
        let mut frames = FrameResourceManager::new(backend.clone(), 3);

        for expected in [0, 1, 2, 0] {
            assert_eq!(frames.current_slot(), expected);
            frames.begin_frame();
            frames.end_frame(backend.signal());
        }
        assert_eq!(frames.frames_submitted(), 4);
        assert_eq!(frames.slot(0).map(|s| s.submissions()), Some(2));
    }

    #[test]
    fn test_begin_frame_waits_on_reused_slot() {
        let backend = Arc::new(HeadlessBackend::new());
        let mut frames = FrameResourceManager::new(backend.clone(), 2);

        frames.begin_frame();
        frames.end_frame(backend.signal());
        frames.begin_frame();
        frames.end_frame(backend.signal());
        assert_eq!(backend.stats().fence_waits, 0);

        frames.begin_frame();
        assert_eq!(backend.stats().fence_waits, 1);
    }

    #[test]
    fn test_pause_is_idempotent() {
        let backend = Arc::new(HeadlessBackend::new());
        let mut frames = FrameResourceManager::new(backend.clone(), 3);

        frames.pause();
        frames.pause();
        assert!(frames.is_paused());
        assert_eq!(backend.stats().idle_waits, 1);

        frames.resume();
        assert!(!frames.is_paused());
        assert_eq!(backend.stats().idle_waits, 1);
    }

    #[test]
    fn test_zero_buffering_keeps_one_slot() {
        let frames = FrameResourceManager::new(Arc::new(HeadlessBackend::new()), 0);
        assert_eq!(frames.buffering(), 1);
    }
}
