//! Manager-level metrics.
//!
//! Relaxed counters shared by all shards under one manager, with a
//! consistent-enough snapshot type for reporting. These are statistical;
//! nothing reads them for safety decisions.

use crate::sync::{AtomicU64, Ordering};

/// Atomic counters tracking manager-wide activity.
#[derive(Debug, Default)]
pub(crate) struct ManagerMetrics {
    pub(crate) find_hits: AtomicU64,
    pub(crate) find_misses: AtomicU64,
    pub(crate) caches_created: AtomicU64,
    pub(crate) caches_shut_down: AtomicU64,
    pub(crate) grows_approved: AtomicU64,
    pub(crate) grows_rejected: AtomicU64,
    pub(crate) migrates_approved: AtomicU64,
    pub(crate) migrates_rejected: AtomicU64,
    pub(crate) migrates_completed: AtomicU64,
    pub(crate) sweeps_completed: AtomicU64,
    pub(crate) tables_reused: AtomicU64,
}

impl ManagerMetrics {
    pub(crate) fn snapshot(&self, memory_accounted: u64, caches_registered: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            find_hits: self.find_hits.load(Ordering::Relaxed),
            find_misses: self.find_misses.load(Ordering::Relaxed),
            caches_created: self.caches_created.load(Ordering::Relaxed),
            caches_shut_down: self.caches_shut_down.load(Ordering::Relaxed),
            grows_approved: self.grows_approved.load(Ordering::Relaxed),
            grows_rejected: self.grows_rejected.load(Ordering::Relaxed),
            migrates_approved: self.migrates_approved.load(Ordering::Relaxed),
            migrates_rejected: self.migrates_rejected.load(Ordering::Relaxed),
            migrates_completed: self.migrates_completed.load(Ordering::Relaxed),
            sweeps_completed: self.sweeps_completed.load(Ordering::Relaxed),
            tables_reused: self.tables_reused.load(Ordering::Relaxed),
            memory_accounted,
            caches_registered,
        }
    }
}

/// Snapshot of manager-wide counters at a point in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    /// Sampled find hits reported by all shards.
    pub find_hits: u64,
    /// Sampled find misses reported by all shards.
    pub find_misses: u64,
    /// Caches created over the manager's lifetime.
    pub caches_created: u64,
    /// Caches shut down over the manager's lifetime.
    pub caches_shut_down: u64,
    /// Grow requests approved.
    pub grows_approved: u64,
    /// Grow requests rejected (budget or state).
    pub grows_rejected: u64,
    /// Migrate requests approved.
    pub migrates_approved: u64,
    /// Migrate requests rejected (budget or state).
    pub migrates_rejected: u64,
    /// Migrations that ran to completion.
    pub migrates_completed: u64,
    /// Free-memory sweeps that ran to completion.
    pub sweeps_completed: u64,
    /// Tables served from the reclaim pool instead of fresh allocation.
    pub tables_reused: u64,
    /// Bytes currently charged against the global budget.
    pub memory_accounted: u64,
    /// Caches currently registered.
    pub caches_registered: u64,
}

impl MetricsSnapshot {
    /// Global sampled hit rate as a percentage, or NaN with no samples.
    pub fn global_hit_rate(&self) -> f64 {
        let total = self.find_hits + self.find_misses;
        if total == 0 {
            f64::NAN
        } else {
            100.0 * self.find_hits as f64 / total as f64
        }
    }
}
