//! Per-shard accounting.
//!
//! [`Metadata`] tracks what one cache shard holds (table memory plus live
//! values) against manager-granted limits, and carries the structural
//! flags (Resizing, Migrating). Limits and flags live behind a
//! readers-writer lock; usage itself is an atomic so the hot insert and
//! remove paths only take the lock in read mode.
//!
//! Lock order: the cache's task lock, then this lock, then bucket locks.
//! No path takes a bucket lock while holding this lock in write mode.

use parking_lot::RwLock;

use crate::config::SOFT_LIMIT_RATIO;
use crate::sync::{AtomicU64, Ordering};

const FLAG_RESIZING: u8 = 1 << 0;
const FLAG_MIGRATING: u8 = 1 << 1;

/// Limits and structural state, guarded by the metadata lock.
#[derive(Debug)]
struct Limits {
    /// Bytes held for internal structures (fixed overhead + table).
    fixed_size: u64,
    /// Current table's memory footprint.
    table_size: u64,
    /// Sweep target: the background sweep frees values until usage is at
    /// or below this.
    soft_usage_limit: u64,
    /// Admission bound: inserts fail rather than push usage past this.
    hard_usage_limit: u64,
    flags: u8,
}

/// Accounting state for one cache shard.
pub struct Metadata {
    limits: RwLock<Limits>,
    usage: AtomicU64,
}

impl Metadata {
    /// Create accounting state with the given hard usage limit.
    ///
    /// The soft limit is derived via [`SOFT_LIMIT_RATIO`]; `fixed_size`
    /// covers the shard's own structures, `table_size` the initial table.
    pub fn new(hard_usage_limit: u64, fixed_size: u64, table_size: u64) -> Self {
        Self {
            limits: RwLock::new(Limits {
                fixed_size,
                table_size,
                soft_usage_limit: soft_limit_for(hard_usage_limit),
                hard_usage_limit,
                flags: 0,
            }),
            usage: AtomicU64::new(0),
        }
    }

    /// Bytes currently live in values.
    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::Relaxed)
    }

    /// Bytes held for internal structures (fixed overhead plus table).
    pub fn allocated_size(&self) -> u64 {
        let limits = self.limits.read();
        limits.fixed_size + limits.table_size
    }

    /// Current soft usage limit.
    pub fn soft_usage_limit(&self) -> u64 {
        self.limits.read().soft_usage_limit
    }

    /// Current hard usage limit.
    pub fn hard_usage_limit(&self) -> u64 {
        self.limits.read().hard_usage_limit
    }

    /// Try to adjust usage by `delta` bytes.
    ///
    /// Negative deltas always succeed (saturating at zero). Positive
    /// deltas succeed while the result stays at or below the hard limit;
    /// while the Resizing flag is set the soft limit is enforced instead,
    /// so the sweep converges rather than racing admissions.
    pub fn adjust_usage_if_allowed(&self, delta: i64) -> bool {
        if delta <= 0 {
            let decrease = delta.unsigned_abs();
            let mut current = self.usage.load(Ordering::Relaxed);
            loop {
                let next = current.saturating_sub(decrease);
                match self.usage.compare_exchange_weak(
                    current,
                    next,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return true,
                    Err(observed) => current = observed,
                }
            }
        }

        let limits = self.limits.read();
        let limit = if limits.flags & FLAG_RESIZING != 0 {
            limits.soft_usage_limit
        } else {
            limits.hard_usage_limit
        };
        let increase = delta as u64;
        let mut current = self.usage.load(Ordering::Relaxed);
        loop {
            let Some(next) = current.checked_add(increase) else {
                return false;
            };
            if next > limit {
                return false;
            }
            match self.usage.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Whether usage is at or below the soft limit.
    pub fn under_soft_limit(&self) -> bool {
        self.usage() <= self.limits.read().soft_usage_limit
    }

    /// Install new usage limits (manager decision). The soft limit is
    /// re-derived from the hard limit.
    pub fn set_usage_limits(&self, hard_usage_limit: u64) {
        let mut limits = self.limits.write();
        limits.hard_usage_limit = hard_usage_limit;
        limits.soft_usage_limit = soft_limit_for(hard_usage_limit);
    }

    /// Record a table change (migration or release), replacing the table
    /// footprint in `allocated_size`.
    pub fn change_table(&self, table_size: u64) {
        self.limits.write().table_size = table_size;
    }

    /// Reset usage to zero (shutdown, after the table is cleared).
    pub fn reset_usage(&self) {
        self.usage.store(0, Ordering::Relaxed);
    }

    /// Whether the Resizing flag is set.
    pub fn is_resizing(&self) -> bool {
        self.limits.read().flags & FLAG_RESIZING != 0
    }

    /// Whether the Migrating flag is set.
    pub fn is_migrating(&self) -> bool {
        self.limits.read().flags & FLAG_MIGRATING != 0
    }

    /// Whether either structural flag is set.
    pub fn is_resizing_or_migrating(&self) -> bool {
        self.limits.read().flags & (FLAG_RESIZING | FLAG_MIGRATING) != 0
    }

    /// Flip the Resizing flag. The flags are mutually exclusive; setting
    /// one while the other is set is a caller bug.
    pub fn toggle_resizing(&self) {
        let mut limits = self.limits.write();
        if limits.flags & FLAG_RESIZING == 0 {
            debug_assert_eq!(limits.flags & FLAG_MIGRATING, 0);
        }
        limits.flags ^= FLAG_RESIZING;
    }

    /// Flip the Migrating flag.
    pub fn toggle_migrating(&self) {
        let mut limits = self.limits.write();
        if limits.flags & FLAG_MIGRATING == 0 {
            debug_assert_eq!(limits.flags & FLAG_RESIZING, 0);
        }
        limits.flags ^= FLAG_MIGRATING;
    }
}

impl std::fmt::Debug for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let limits = self.limits.read();
        f.debug_struct("Metadata")
            .field("usage", &self.usage())
            .field("soft_usage_limit", &limits.soft_usage_limit)
            .field("hard_usage_limit", &limits.hard_usage_limit)
            .field("resizing", &(limits.flags & FLAG_RESIZING != 0))
            .field("migrating", &(limits.flags & FLAG_MIGRATING != 0))
            .finish()
    }
}

fn soft_limit_for(hard: u64) -> u64 {
    (hard as f64 * SOFT_LIMIT_RATIO) as u64
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_soft_limit_derived() {
        let metadata = Metadata::new(1000, 64, 256);
        assert_eq!(metadata.hard_usage_limit(), 1000);
        assert_eq!(metadata.soft_usage_limit(), 900);
        assert_eq!(metadata.allocated_size(), 320);
    }

    #[test]
    fn test_adjust_usage_respects_hard_limit() {
        let metadata = Metadata::new(1000, 0, 0);
        assert!(metadata.adjust_usage_if_allowed(950));
        assert_eq!(metadata.usage(), 950);
        // 950 + 100 > 1000
        assert!(!metadata.adjust_usage_if_allowed(100));
        assert_eq!(metadata.usage(), 950);
        assert!(metadata.adjust_usage_if_allowed(50));
        assert_eq!(metadata.usage(), 1000);
    }

    #[test]
    fn test_adjust_usage_soft_limit_while_resizing() {
        let metadata = Metadata::new(1000, 0, 0);
        metadata.toggle_resizing();
        assert!(metadata.adjust_usage_if_allowed(900));
        assert!(!metadata.adjust_usage_if_allowed(1));
        metadata.toggle_resizing();
        assert!(metadata.adjust_usage_if_allowed(1));
    }

    #[test]
    fn test_negative_adjust_saturates() {
        let metadata = Metadata::new(1000, 0, 0);
        assert!(metadata.adjust_usage_if_allowed(100));
        assert!(metadata.adjust_usage_if_allowed(-500));
        assert_eq!(metadata.usage(), 0);
    }

    #[test]
    fn test_flags_toggle_independently() {
        let metadata = Metadata::new(1000, 0, 0);
        assert!(!metadata.is_resizing_or_migrating());
        metadata.toggle_resizing();
        assert!(metadata.is_resizing());
        assert!(!metadata.is_migrating());
        metadata.toggle_resizing();
        metadata.toggle_migrating();
        assert!(metadata.is_migrating());
        assert!(metadata.is_resizing_or_migrating());
        metadata.toggle_migrating();
        assert!(!metadata.is_resizing_or_migrating());
    }

    #[test]
    fn test_change_table_updates_allocated_size() {
        let metadata = Metadata::new(1000, 100, 200);
        metadata.change_table(400);
        assert_eq!(metadata.allocated_size(), 500);
        metadata.change_table(0);
        assert_eq!(metadata.allocated_size(), 100);
    }
}
