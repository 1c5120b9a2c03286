//! Atomic arena counters for lock-free usage tracking.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of arena activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArenaStats {
    /// Groups handed out.
    pub groups_allocated: u64,
    /// Groups returned.
    pub groups_released: u64,
    /// Chunk pairs appended to the table.
    pub chunks_appended: u64,
    /// Slots skipped to keep a group inside one chunk.
    pub slots_skipped: u64,
    /// Released slots that were already free.
    pub anomalies: u64,
}

/// Atomic arena counters.
#[derive(Debug)]
pub struct AtomicArenaStats {
    groups_allocated: AtomicU64,
    groups_released: AtomicU64,
    chunks_appended: AtomicU64,
    slots_skipped: AtomicU64,
    anomalies: AtomicU64,
}

impl AtomicArenaStats {
    /// Create new zeroed stats.
    pub fn new() -> Self {
        Self {
            groups_allocated: AtomicU64::new(0),
            groups_released: AtomicU64::new(0),
            chunks_appended: AtomicU64::new(0),
            slots_skipped: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
        }
    }

    /// Take a snapshot of current stats.
    pub fn snapshot(&self) -> ArenaStats {
        ArenaStats {
            groups_allocated: self.groups_allocated.load(Ordering::Relaxed),
            groups_released: self.groups_released.load(Ordering::Relaxed),
            chunks_appended: self.chunks_appended.load(Ordering::Relaxed),
            slots_skipped: self.slots_skipped.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.groups_allocated.store(0, Ordering::Relaxed);
        self.groups_released.store(0, Ordering::Relaxed);
        self.chunks_appended.store(0, Ordering::Relaxed);
        self.slots_skipped.store(0, Ordering::Relaxed);
        self.anomalies.store(0, Ordering::Relaxed);
    }

    /// Count one allocated group.
    pub fn record_allocation(&self) {
        self.groups_allocated.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one released group.
    pub fn record_release(&self) {
        self.groups_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Count appended chunk pairs.
    pub fn record_chunks(&self, n: usize) {
        self.chunks_appended.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Count slots wasted at a chunk tail.
    pub fn record_skipped(&self, n: usize) {
        self.slots_skipped.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Count occupancy anomalies.
    pub fn record_anomalies(&self, n: usize) {
        self.anomalies.fetch_add(n as u64, Ordering::Relaxed);
    }
}

impl Default for AtomicArenaStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stats_are_zeroed() {
        let stats = AtomicArenaStats::new();
        assert_eq!(stats.snapshot(), ArenaStats::default());
    }

    #[test]
    fn record_and_snapshot() {
        let stats = AtomicArenaStats::new();
        stats.record_allocation();
        stats.record_allocation();
        stats.record_release();
        stats.record_chunks(3);
        stats.record_skipped(7);
        stats.record_anomalies(8);
        let snap = stats.snapshot();
        assert_eq!(snap.groups_allocated, 2);
        assert_eq!(snap.groups_released, 1);
        assert_eq!(snap.chunks_appended, 3);
        assert_eq!(snap.slots_skipped, 7);
        assert_eq!(snap.anomalies, 8);
    }

    #[test]
    fn reset_clears_counters() {
        let stats = AtomicArenaStats::new();
        stats.record_allocation();
        stats.record_chunks(1);
        stats.reset();
        assert_eq!(stats.snapshot(), ArenaStats::default());
    }
}
