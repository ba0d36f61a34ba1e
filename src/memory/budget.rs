//! Shared device-local memory budget
//!
//! wgpu does not report heap sizes, so the renderer tracks device-local usage
//! itself against a configured total. Every arena that prefers device-local
//! memory reserves its full capacity here first; a failed reservation sends the
//! arena straight to the host-visible tier.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct DeviceMemoryBudget {
    total: u64,
    used: AtomicU64,
}

impl DeviceMemoryBudget {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            used: AtomicU64::new(0),
        }
    }

    /// Reserve `size` bytes if they fit
    pub fn try_reserve(&self, size: u64) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|&next| next <= self.total)
            })
            .is_ok()
    }

    /// Return `size` bytes; never drops below zero
    pub fn release(&self, size: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(size))
            });
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn available(&self) -> u64 {
        self.total.saturating_sub(self.used())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reserve_within_total() {
        let budget = DeviceMemoryBudget::new(100);
        assert!(budget.try_reserve(60));
        assert!(!budget.try_reserve(60));
        assert!(budget.try_reserve(40));
        assert_eq!(budget.available(), 0);
    }

    #[test]
    fn test_zero_budget_rejects_everything() {
        let budget = DeviceMemoryBudget::new(0);
        assert!(!budget.try_reserve(1));
        assert!(budget.try_reserve(0));
    }

    #[test]
    fn test_release_floors_at_zero() {
        let budget = DeviceMemoryBudget::new(100);
        assert!(budget.try_reserve(10));
        budget.release(50);
        assert_eq!(budget.used(), 0);
        assert_eq!(budget.available(), 100);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_total() {
        let budget = Arc::new(DeviceMemoryBudget::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = budget.clone();
                std::thread::spawn(move || (0..100).filter(|_| budget.try_reserve(7)).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().expect("thread")).sum();
        assert_eq!(granted, 1000 / 7);
        assert!(budget.used() <= budget.total());
    }
}
