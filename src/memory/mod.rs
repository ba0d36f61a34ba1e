//! GPU memory management
//!
//! Fixed-capacity arenas over backend buffers, the shared device-local budget
//! they reserve from, and the staging path for device-local writes.

pub mod arena;
pub mod budget;
pub mod staging;

pub use arena::BufferArena;
pub use budget::DeviceMemoryBudget;
pub use staging::StagingUploader;

use crate::gpu::MemoryTier;
use serde::Serialize;

/// Snapshot of one arena
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArenaUsage {
    pub label: String,
    pub capacity: u64,
    pub used: u64,
    pub tier: MemoryTier,
}

impl ArenaUsage {
    pub fn utilization(&self) -> f32 {
        if self.capacity == 0 {
            0.0
        } else {
            self.used as f32 / self.capacity as f32
        }
    }
}

/// Per-pipeline memory report
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub pipeline: String,
    pub arenas: Vec<ArenaUsage>,
}

impl MemoryUsage {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            arenas: Vec::new(),
        }
    }

    pub fn total_capacity(&self) -> u64 {
        self.arenas.iter().map(|a| a.capacity).sum()
    }

    pub fn total_used(&self) -> u64 {
        self.arenas.iter().map(|a| a.used).sum()
    }

    /// True when any arena ended up in device-local memory
    pub fn uses_device_local(&self) -> bool {
        self.arenas.iter().any(|a| a.tier == MemoryTier::DeviceLocal)
    }

    pub fn arena(&self, label: &str) -> Option<&ArenaUsage> {
        self.arenas.iter().find(|a| a.label == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_totals() {
        let mut usage = MemoryUsage::new("props");
        usage.arenas.push(ArenaUsage {
            label: "vertices".into(),
            capacity: 100,
            used: 25,
            tier: MemoryTier::HostVisible,
        });
        usage.arenas.push(ArenaUsage {
            label: "indices".into(),
            capacity: 50,
            used: 50,
            tier: MemoryTier::DeviceLocal,
        });

        assert_eq!(usage.total_capacity(), 150);
        assert_eq!(usage.total_used(), 75);
        assert!(usage.uses_device_local());
        assert_eq!(usage.arena("vertices").map(|a| a.utilization()), Some(0.25));
    }
}
