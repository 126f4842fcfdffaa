//! Coordinator Statistics Module
//!
//! Lock-free counters for the cache coordinator, readable as a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Coordinator Stats ==
/// Counters updated on every coordinator decision.
///
/// Shared through an `Arc` so the HTTP layer can report them while requests
/// are in flight.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    hits: AtomicU64,
    misses: AtomicU64,
    locks_acquired: AtomicU64,
    served_after_wait: AtomicU64,
    wait_timeouts: AtomicU64,
    fail_opens: AtomicU64,
    corrupt_entries: AtomicU64,
    compute_errors: AtomicU64,
    cancellations: AtomicU64,
}

impl CoordinatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_acquired(&self) {
        self.locks_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_served_after_wait(&self) {
        self.served_after_wait.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait_timeout(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fail_open(&self) {
        self.fail_opens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt_entry(&self) {
        self.corrupt_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compute_error(&self) {
        self.compute_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            locks_acquired: self.locks_acquired.load(Ordering::Relaxed),
            served_after_wait: self.served_after_wait.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            fail_opens: self.fail_opens.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            compute_errors: self.compute_errors.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }
}

// == Stats Snapshot ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Values served straight from the store
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Misses that won the compute lock
    pub locks_acquired: u64,
    /// Waiters that received another worker's value
    pub served_after_wait: u64,
    /// Waiters that gave up and computed directly
    pub wait_timeouts: u64,
    /// Store faults that forced a direct computation
    pub fail_opens: u64,
    /// Undeserializable entries deleted
    pub corrupt_entries: u64,
    /// Compute functions that returned an error
    pub compute_errors: u64,
    /// Operations interrupted by a cancellation signal
    pub cancellations: u64,
}

impl StatsSnapshot {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let snapshot = CoordinatorStats::new().snapshot();
        assert_eq!(snapshot, StatsSnapshot::default());
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(StatsSnapshot::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let stats = CoordinatorStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.snapshot().hit_rate(), 0.75);
    }

    #[test]
    fn test_every_counter_is_reported() {
        let stats = CoordinatorStats::new();
        stats.record_lock_acquired();
        stats.record_served_after_wait();
        stats.record_wait_timeout();
        stats.record_fail_open();
        stats.record_corrupt_entry();
        stats.record_compute_error();
        stats.record_cancellation();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.locks_acquired, 1);
        assert_eq!(snapshot.served_after_wait, 1);
        assert_eq!(snapshot.wait_timeouts, 1);
        assert_eq!(snapshot.fail_opens, 1);
        assert_eq!(snapshot.corrupt_entries, 1);
        assert_eq!(snapshot.compute_errors, 1);
        assert_eq!(snapshot.cancellations, 1);
    }
}
