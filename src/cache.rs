//! The cache shard.
//!
//! A [`Cache`] maps fingerprinted keys to values through a bucket
//! [`Table`](crate::Table), accounts usage against manager-granted
//! limits, and reshapes itself under pressure: inserts that evict too
//! often request a migration to a larger table, inserts that hit the
//! usage limit request more memory, and the manager calls back into
//! [`Cache::free_memory`] and [`Cache::migrate`] to execute approved
//! structural work.
//!
//! Lock order across the shard: task lock, then metadata, then bucket
//! locks (primary bucket before auxiliary bucket). No path requests
//! structural work while holding a bucket lock.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{
    CacheKind, EVICTION_CHECK_MASK, EVICTION_RATE_THRESHOLD, MAX_LOG_SIZE, MIN_LOG_SIZE,
    STAT_SAMPLE_MASK, TRIES_FAST, TRIES_SLOW,
};
use crate::error::{CacheError, CacheResult};
use crate::manager::Manager;
use crate::metadata::Metadata;
use crate::stats::{Stat, StatBuffer};
use crate::sync::{AtomicBool, AtomicU64, Ordering, monotonic_nanos};
use crate::table::{BucketData, Table};
use crate::value::{CachedValue, Finding};

/// How long shutdown sleeps between structural-flag checks.
const SHUTDOWN_FLAG_POLL: Duration = Duration::from_micros(20);

/// One cache shard registered with a [`Manager`].
///
/// Created through [`Manager::create_cache`]; destroyed by calling
/// [`Cache::shutdown`] (idempotent) and dropping the handle.
pub struct Cache {
    shutdown: AtomicBool,
    manager: Arc<Manager>,
    id: u64,
    kind: CacheKind,
    metadata: Metadata,
    table: RwLock<Option<Arc<Table>>>,
    find_stats: Option<StatBuffer>,
    find_hits: AtomicU64,
    find_misses: AtomicU64,
    inserts_total: AtomicU64,
    insert_evictions: AtomicU64,
    migrate_request_time: AtomicU64,
    resize_request_time: AtomicU64,
    /// Serializes structural decisions (grow/migrate requests, the table
    /// swap, shutdown).
    task_lock: Mutex<()>,
}

impl Cache {
    pub(crate) fn new(
        manager: Arc<Manager>,
        id: u64,
        kind: CacheKind,
        metadata: Metadata,
        table: Arc<Table>,
        find_stats: Option<StatBuffer>,
    ) -> Arc<Self> {
        table.enable();
        let now = monotonic_nanos();
        Arc::new(Self {
            shutdown: AtomicBool::new(false),
            manager,
            id,
            kind,
            metadata,
            table: RwLock::new(Some(table)),
            find_stats,
            find_hits: AtomicU64::new(0),
            find_misses: AtomicU64::new(0),
            inserts_total: AtomicU64::new(0),
            insert_evictions: AtomicU64::new(0),
            migrate_request_time: AtomicU64::new(now),
            resize_request_time: AtomicU64::new(now),
            task_lock: Mutex::new(()),
        })
    }

    /// The id the manager assigned at registration.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The cache variant.
    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Whether the shard has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Snapshot of the current table, if the shard is still live.
    pub fn table(&self) -> Option<Arc<Table>> {
        self.table.read().clone()
    }

    /// The shard's accounting state.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn term(&self) -> u64 {
        match self.kind {
            CacheKind::Plain => 0,
            CacheKind::Transactional => self.manager.current_term(),
        }
    }

    /// Look up a key.
    ///
    /// Probes the primary bucket for the fingerprint and, while a
    /// migration is in flight, the auxiliary bucket as well. On a hit
    /// the returned [`Finding`] keeps the value alive past any
    /// concurrent eviction. A shard that has been shut down reports
    /// `NotFound`.
    pub fn find(&self, fingerprint: u32, key: &[u8]) -> CacheResult<Finding> {
        if self.is_shutdown() {
            return Err(CacheError::NotFound);
        }
        let Some(table) = self.table() else {
            return Err(CacheError::NotFound);
        };
        let term = self.term();

        let index = table.bucket_index(fingerprint);
        let Some(mut primary) = table.lock_bucket(index, TRIES_FAST) else {
            return Err(CacheError::BucketBusy);
        };
        if !table.is_enabled() {
            // cleared behind a stale snapshot; retry against the fresh
            // table pointer
            return Err(CacheError::BucketBusy);
        }
        primary.refresh_term(term);
        if let Some(value) = primary.find(fingerprint, key) {
            drop(primary);
            self.record_stat(Stat::FindHit);
            return Ok(Finding::new(value));
        }

        // fixed order: auxiliary is probed while primary is still held
        if let Some(auxiliary) = table.auxiliary() {
            let aux_index = auxiliary.bucket_index(fingerprint);
            let Some(mut aux_bucket) = auxiliary.lock_bucket(aux_index, TRIES_FAST) else {
                return Err(CacheError::BucketBusy);
            };
            if !auxiliary.is_enabled() {
                return Err(CacheError::BucketBusy);
            }
            aux_bucket.refresh_term(term);
            if let Some(value) = aux_bucket.find(fingerprint, key) {
                drop(aux_bucket);
                drop(primary);
                self.record_stat(Stat::FindHit);
                return Ok(Finding::new(value));
            }
        } else if primary.migrated {
            // stale table snapshot from just before the swap; the entry,
            // if any, lives in a table we can no longer reach from here
            return Err(CacheError::BucketBusy);
        }

        drop(primary);
        self.record_stat(Stat::FindMiss);
        Err(CacheError::NotFound)
    }

    /// Insert a value under the given fingerprint.
    ///
    /// Returns `Ok(true)` if an unrelated slot was evicted to make room,
    /// `Ok(false)` otherwise (including in-place replacement of the same
    /// key). Rejections: `OverCapacity` when the usage limit would be
    /// exceeded (this also files a grow request), `Banished` for a
    /// fingerprint banished in the current term (transactional only),
    /// `BucketBusy` when the bucket lock budget is exhausted.
    pub fn insert(&self, fingerprint: u32, value: CachedValue) -> CacheResult<bool> {
        if self.is_shutdown() {
            return Err(CacheError::Shutdown);
        }
        let Some(table) = self.table() else {
            return Err(CacheError::Shutdown);
        };
        let term = self.term();

        let result = {
            let index = table.bucket_index(fingerprint);
            let Some(mut primary) = table.lock_bucket(index, TRIES_FAST) else {
                return Err(CacheError::BucketBusy);
            };
            if !table.is_enabled() {
                return Err(CacheError::BucketBusy);
            }
            primary.refresh_term(term);
            if primary.migrated {
                // writes go to the authoritative table once the bucket
                // has been moved
                if let Some(auxiliary) = table.auxiliary() {
                    let aux_index = auxiliary.bucket_index(fingerprint);
                    let Some(mut target) = auxiliary.lock_bucket(aux_index, TRIES_FAST) else {
                        return Err(CacheError::BucketBusy);
                    };
                    if !auxiliary.is_enabled() {
                        return Err(CacheError::BucketBusy);
                    }
                    target.refresh_term(term);
                    drop(primary);
                    self.insert_into(&mut target, auxiliary.slots_per_bucket(), fingerprint, value)
                } else {
                    Err(CacheError::BucketBusy)
                }
            } else {
                self.insert_into(&mut primary, table.slots_per_bucket(), fingerprint, value)
            }
        };

        match result {
            Ok(had_eviction) => {
                if self.report_insert(&table, had_eviction) {
                    self.request_migrate(table.log_size() + 1);
                }
                Ok(had_eviction)
            }
            Err(CacheError::OverCapacity) => {
                self.request_grow();
                Err(CacheError::OverCapacity)
            }
            Err(other) => Err(other),
        }
    }

    /// Insert into a locked bucket. Admission is checked against the net
    /// usage delta: replacing the same key charges the size difference,
    /// and a full bucket charges new minus the eviction victim.
    fn insert_into(
        &self,
        bucket: &mut BucketData,
        slots_per_bucket: usize,
        fingerprint: u32,
        value: CachedValue,
    ) -> CacheResult<bool> {
        if self.kind == CacheKind::Transactional && bucket.is_banished(fingerprint) {
            return Err(CacheError::Banished);
        }
        let size = value.size();

        if let Some(position) = bucket.position(fingerprint, value.key()) {
            let old_size = bucket.replace_peek_size(position);
            let delta = size as i64 - old_size as i64;
            if !self.metadata.adjust_usage_if_allowed(delta) {
                return Err(CacheError::OverCapacity);
            }
            bucket.replace_at(position, Arc::new(value));
            return Ok(false);
        }

        let full = bucket.len() >= slots_per_bucket;
        let victim_size = if full {
            bucket.oldest_size().unwrap_or(0)
        } else {
            0
        };
        let delta = size as i64 - victim_size as i64;
        if !self.metadata.adjust_usage_if_allowed(delta) {
            return Err(CacheError::OverCapacity);
        }
        let mut had_eviction = false;
        if full {
            bucket.evict_oldest();
            had_eviction = true;
        }
        bucket.push(fingerprint, Arc::new(value));
        Ok(had_eviction)
    }

    /// Remove a key. The reclaimed bytes are released from usage; the
    /// value itself is freed once the last outstanding [`Finding`] drops.
    pub fn remove(&self, fingerprint: u32, key: &[u8]) -> CacheResult<()> {
        if self.is_shutdown() {
            return Err(CacheError::Shutdown);
        }
        let Some(table) = self.table() else {
            return Err(CacheError::Shutdown);
        };
        let term = self.term();

        let index = table.bucket_index(fingerprint);
        let Some(mut primary) = table.lock_bucket(index, TRIES_SLOW) else {
            return Err(CacheError::BucketBusy);
        };
        if !table.is_enabled() {
            return Err(CacheError::BucketBusy);
        }
        primary.refresh_term(term);
        if let Some(position) = primary.position(fingerprint, key) {
            let slot = primary.remove_at(position);
            drop(primary);
            self.metadata
                .adjust_usage_if_allowed(-(slot.value.size() as i64));
            return Ok(());
        }
        if primary.migrated {
            let Some(auxiliary) = table.auxiliary() else {
                return Err(CacheError::BucketBusy);
            };
            let aux_index = auxiliary.bucket_index(fingerprint);
            let Some(mut target) = auxiliary.lock_bucket(aux_index, TRIES_SLOW) else {
                return Err(CacheError::BucketBusy);
            };
            if !auxiliary.is_enabled() {
                return Err(CacheError::BucketBusy);
            }
            target.refresh_term(term);
            drop(primary);
            if let Some(position) = target.position(fingerprint, key) {
                let slot = target.remove_at(position);
                drop(target);
                self.metadata
                    .adjust_usage_if_allowed(-(slot.value.size() as i64));
                return Ok(());
            }
        }
        Err(CacheError::NotFound)
    }

    /// Banish a fingerprint for the current term (transactional only).
    ///
    /// Removes the entry if present and rejects inserts of the
    /// fingerprint until the manager advances the term. Succeeds whether
    /// or not the key was present.
    pub fn banish(&self, fingerprint: u32, key: &[u8]) -> CacheResult<()> {
        if self.kind != CacheKind::Transactional {
            return Err(CacheError::Unsupported);
        }
        if self.is_shutdown() {
            return Err(CacheError::Shutdown);
        }
        let Some(table) = self.table() else {
            return Err(CacheError::Shutdown);
        };
        let term = self.term();

        let index = table.bucket_index(fingerprint);
        let Some(mut primary) = table.lock_bucket(index, TRIES_SLOW) else {
            return Err(CacheError::BucketBusy);
        };
        if !table.is_enabled() {
            return Err(CacheError::BucketBusy);
        }
        primary.refresh_term(term);
        if primary.migrated {
            let Some(auxiliary) = table.auxiliary() else {
                return Err(CacheError::BucketBusy);
            };
            let aux_index = auxiliary.bucket_index(fingerprint);
            let Some(mut target) = auxiliary.lock_bucket(aux_index, TRIES_SLOW) else {
                return Err(CacheError::BucketBusy);
            };
            if !auxiliary.is_enabled() {
                return Err(CacheError::BucketBusy);
            }
            target.refresh_term(term);
            drop(primary);
            self.banish_in(&mut target, fingerprint, key);
            return Ok(());
        }
        self.banish_in(&mut primary, fingerprint, key);
        Ok(())
    }

    fn banish_in(&self, bucket: &mut BucketData, fingerprint: u32, key: &[u8]) {
        if let Some(position) = bucket.position(fingerprint, key) {
            let slot = bucket.remove_at(position);
            self.metadata
                .adjust_usage_if_allowed(-(slot.value.size() as i64));
        }
        bucket.banish_fingerprint(fingerprint);
    }

    /// Suggest a table size for an expected element count.
    ///
    /// Derives the target exponent from the ideal fill ratio and files a
    /// migrate request (subject to the cooldown).
    pub fn size_hint(&self, expected_elements: u64) {
        if self.is_shutdown() {
            return;
        }
        let Some(table) = self.table() else {
            return;
        };
        let per_bucket =
            table.slots_per_bucket() as f64 * self.manager.ideal_upper_fill_ratio();
        let buckets = (expected_elements as f64 / per_bucket).ceil() as u64;
        let mut log_size = MIN_LOG_SIZE;
        while (1u64 << log_size) < buckets && log_size < MAX_LOG_SIZE {
            log_size += 1;
        }
        self.request_migrate(log_size);
    }

    /// Bytes held for internal structures. Zero once shut down.
    pub fn size(&self) -> u64 {
        if self.is_shutdown() {
            return 0;
        }
        self.metadata.allocated_size()
    }

    /// Bytes currently live in values. Zero once shut down.
    pub fn usage(&self) -> u64 {
        if self.is_shutdown() {
            return 0;
        }
        self.metadata.usage()
    }

    /// The soft usage limit. Zero once shut down.
    pub fn usage_limit(&self) -> u64 {
        if self.is_shutdown() {
            return 0;
        }
        self.metadata.soft_usage_limit()
    }

    /// Allocated size and usage in one snapshot. Zeros once shut down.
    pub fn size_and_usage(&self) -> (u64, u64) {
        if self.is_shutdown() {
            return (0, 0);
        }
        (self.metadata.allocated_size(), self.metadata.usage())
    }

    /// Lifetime and windowed hit rates as percentages, NaN when no
    /// samples exist. Both are 1-in-8 sampled estimates.
    pub fn hit_rates(&self) -> (f64, f64) {
        let hits = self.find_hits.load(Ordering::Relaxed);
        let misses = self.find_misses.load(Ordering::Relaxed);
        let lifetime = if hits + misses > 0 {
            100.0 * hits as f64 / (hits + misses) as f64
        } else {
            f64::NAN
        };

        let windowed = match &self.find_stats {
            Some(stats) => {
                let mut hits = 0u64;
                let mut misses = 0u64;
                for (code, count) in stats.frequencies() {
                    if code == Stat::FindHit as u8 {
                        hits = count;
                    } else if code == Stat::FindMiss as u8 {
                        misses = count;
                    }
                }
                if hits + misses > 0 {
                    100.0 * hits as f64 / (hits + misses) as f64
                } else {
                    f64::NAN
                }
            }
            None => f64::NAN,
        };

        (lifetime, windowed)
    }

    /// Whether a free-memory sweep is in progress.
    pub fn is_resizing(&self) -> bool {
        !self.is_shutdown() && self.metadata.is_resizing()
    }

    /// Whether a migration is in progress.
    pub fn is_migrating(&self) -> bool {
        !self.is_shutdown() && self.metadata.is_migrating()
    }

    /// Whether the manager may start structural work on this shard.
    pub fn can_resize(&self) -> bool {
        !self.is_shutdown() && !self.metadata.is_resizing_or_migrating()
    }

    /// Record one sampled find outcome (1-in-8).
    fn record_stat(&self, stat: Stat) {
        if self.manager.shared_prng().rand() & STAT_SAMPLE_MASK != 0 {
            return;
        }
        match stat {
            Stat::FindHit => {
                self.find_hits.fetch_add(1, Ordering::Relaxed);
            }
            Stat::FindMiss => {
                self.find_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        if let Some(stats) = &self.find_stats {
            stats.insert_record(stat);
        }
        self.manager.report_hit_stat(stat);
    }

    /// Update the eviction-pressure counters; on 1-in-128 sampled
    /// inserts, check the eviction rate and reset the window. Returns
    /// whether the caller should request a migrate.
    fn report_insert(&self, table: &Table, had_eviction: bool) -> bool {
        let mut should_migrate = false;
        if had_eviction {
            self.insert_evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.inserts_total.fetch_add(1, Ordering::Relaxed);

        if self.manager.shared_prng().rand() & EVICTION_CHECK_MASK == 0 {
            let total = self.inserts_total.load(Ordering::Relaxed);
            let evictions = self.insert_evictions.load(Ordering::Relaxed);
            if total > 0
                && total > evictions
                && evictions as f64 / total as f64 > EVICTION_RATE_THRESHOLD
            {
                should_migrate = true;
                table.signal_evictions();
            }
            self.insert_evictions.store(0, Ordering::Relaxed);
            self.inserts_total.store(0, Ordering::Relaxed);
        }

        should_migrate
    }

    /// Ask the manager for a larger usage limit. Dropped while inside
    /// the cooldown window; the manager's answer sets the next one.
    pub fn request_grow(&self) {
        if self.is_shutdown() || monotonic_nanos() <= self.resize_request_time.load(Ordering::Relaxed)
        {
            return;
        }

        let Some(_task) = crate::sync::lock_with_tries(&self.task_lock, TRIES_SLOW) else {
            return;
        };
        if monotonic_nanos() <= self.resize_request_time.load(Ordering::Relaxed) {
            return;
        }
        if self.metadata.is_resizing() {
            return;
        }
        let (accepted, next_request_time) = self.manager.request_grow(self);
        self.resize_request_time
            .store(next_request_time, Ordering::Relaxed);
        debug!(id = self.id, accepted, "grow requested");
    }

    /// Ask the manager to migrate to a table of `2^requested_log_size`
    /// buckets. Dropped while inside the cooldown window, while already
    /// migrating, or when the size would not change.
    pub fn request_migrate(&self, requested_log_size: u32) {
        let requested_log_size = requested_log_size.clamp(MIN_LOG_SIZE, MAX_LOG_SIZE);
        if self.is_shutdown()
            || monotonic_nanos() <= self.migrate_request_time.load(Ordering::Relaxed)
        {
            return;
        }

        let _task = self.task_lock.lock();
        if monotonic_nanos() <= self.migrate_request_time.load(Ordering::Relaxed) {
            return;
        }
        let Some(table) = self.table() else {
            return;
        };
        if self.metadata.is_migrating() || requested_log_size == table.log_size() {
            return;
        }
        let (accepted, next_request_time) =
            self.manager.request_migrate(self, requested_log_size);
        self.migrate_request_time
            .store(next_request_time, Ordering::Relaxed);
        debug!(
            id = self.id,
            requested_log_size, accepted, "migrate requested"
        );
    }

    /// Free values until usage drops to the soft limit. Manager-facing:
    /// runs with the Resizing flag set; the manager clears the flag when
    /// this returns.
    ///
    /// Buckets are visited in a full pseudo-random permutation (random
    /// start, random odd step over the power-of-two table), so every
    /// bucket is reached within one lap. Aborts on shutdown.
    pub fn free_memory(&self) -> bool {
        debug_assert!(self.metadata.is_resizing());
        if self.is_shutdown() {
            return false;
        }
        if self.metadata.under_soft_limit() {
            return true;
        }
        let Some(table) = self.table() else {
            return false;
        };

        let buckets = table.size() as usize;
        let mask = buckets - 1;
        let start = self.manager.shared_prng().rand() as usize & mask;
        let step = self.manager.shared_prng().rand() as usize | 1; // odd, so coprime to 2^k
        let mut freed_total = 0u64;

        loop {
            let mut progress = false;
            for visit in 0..buckets {
                if self.is_shutdown() {
                    debug!(id = self.id, freed_total, "sweep aborted by shutdown");
                    return false;
                }
                let index = start.wrapping_add(visit.wrapping_mul(step)) & mask;
                let Some(mut bucket) = table.lock_bucket(index, TRIES_SLOW) else {
                    continue;
                };
                let Some(slot) = bucket.evict_oldest() else {
                    continue;
                };
                drop(bucket);
                let reclaimed = slot.value.size();
                freed_total += reclaimed;
                progress = true;
                self.metadata.adjust_usage_if_allowed(-(reclaimed as i64));
                if self.metadata.under_soft_limit() {
                    debug!(id = self.id, freed_total, "sweep reached soft limit");
                    return true;
                }
            }
            if !progress {
                return self.metadata.under_soft_limit();
            }
        }
    }

    /// Rehash into `new_table`. Manager-facing: runs with the Migrating
    /// flag set; the flag is cleared on every exit path.
    ///
    /// Attaches `new_table` as the auxiliary (readers consult both),
    /// moves each bucket (polling for shutdown between buckets), swaps
    /// the table pointer under the task lock, then clears and returns
    /// the old table to the manager. Returns false without swapping if
    /// shutdown intervened: before the auxiliary was attached the new
    /// table goes straight back to the manager, afterwards it stays
    /// attached so shutdown reclaims it along with the primary.
    pub fn migrate(&self, new_table: Arc<Table>) -> bool {
        debug_assert!(self.metadata.is_migrating());

        let mut flag_guard = MigratingFlagGuard {
            metadata: Some(&self.metadata),
        };

        if self.is_shutdown() {
            self.manager.reclaim_table(new_table, false);
            return false;
        }
        let Some(table) = self.table() else {
            self.manager.reclaim_table(new_table, false);
            return false;
        };

        new_table.enable();
        let previous = table.set_auxiliary(Some(Arc::clone(&new_table)));
        debug_assert!(previous.is_none());

        let term = self.term();
        let mut reclaimed_total = 0u64;
        for index in 0..table.size() as usize {
            if self.is_shutdown() {
                debug!(id = self.id, index, "migration aborted by shutdown");
                return false;
            }
            let reclaimed = table.migrate_bucket(index, &new_table, term);
            if reclaimed > 0 {
                reclaimed_total += reclaimed;
                self.metadata.adjust_usage_if_allowed(-(reclaimed as i64));
            }
        }

        let old_table = {
            let _task = self.task_lock.lock();
            self.table.write().replace(Arc::clone(&new_table))
        };
        let Some(old_table) = old_table else {
            // unreachable while the Migrating flag holds shutdown off;
            // the guard still clears the flag
            return false;
        };
        old_table.set_auxiliary(None);

        self.metadata.change_table(new_table.memory_usage());
        self.metadata.toggle_migrating();
        flag_guard.disarm();

        debug!(
            id = self.id,
            from = old_table.log_size(),
            to = new_table.log_size(),
            reclaimed_total,
            "migration complete"
        );

        old_table.clear();
        self.manager.reclaim_table(old_table, true);
        true
    }

    /// Shut the shard down. Idempotent.
    ///
    /// Marks shutdown, waits for any in-flight structural work to clear
    /// its flag (sleeping briefly with locks released), releases the
    /// table (and any auxiliary) to the manager, and unregisters.
    pub fn shutdown(&self) {
        let mut task = self.task_lock.lock();
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        loop {
            if !self.metadata.is_resizing_or_migrating() {
                break;
            }
            drop(task);
            std::thread::sleep(SHUTDOWN_FLAG_POLL);
            task = self.task_lock.lock();
        }

        if let Some(table) = self.table.write().take() {
            if let Some(auxiliary) = table.set_auxiliary(None) {
                auxiliary.clear();
                self.manager.reclaim_table(auxiliary, false);
            }
            table.clear();
            self.manager.reclaim_table(table, true);
        }
        self.metadata.reset_usage();
        self.metadata.change_table(0);
        self.manager.unregister_cache(self.id);
        drop(task);
        debug!(id = self.id, "cache shut down");
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Clears the Migrating flag on every exit path, including panics,
/// unless disarmed after a successful swap.
struct MigratingFlagGuard<'a> {
    metadata: Option<&'a Metadata>,
}

impl MigratingFlagGuard<'_> {
    fn disarm(&mut self) {
        self.metadata = None;
    }
}

impl Drop for MigratingFlagGuard<'_> {
    fn drop(&mut self) {
        if let Some(metadata) = self.metadata.take() {
            debug_assert!(metadata.is_migrating());
            metadata.toggle_migrating();
        }
    }
}
