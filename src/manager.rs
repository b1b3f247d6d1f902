//! Global memory arbitration and structural scheduling.
//!
//! One [`Manager`] owns the memory budget shared by every cache shard,
//! decides grow and migrate requests against it, pools reclaimed tables
//! for reuse, aggregates sampled hit statistics, and hands out the
//! shared PRNG. Approved structural work runs on short-lived named
//! worker threads that call back into the requesting shard
//! ([`Cache::free_memory`] / [`Cache::migrate`]); the shard's metadata
//! flags are the synchronization point with shutdown.
//!
//! For transactional caches the manager is also the term authority:
//! banish lists are scoped to the term current at the time of the
//! banish and expire when [`Manager::advance_term`] is called.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

use crate::cache::Cache;
use crate::config::{CacheConfig, CacheKind, FIND_STATS_CAPACITY};
use crate::error::{CacheError, CacheResult};
use crate::metadata::Metadata;
use crate::metrics::{ManagerMetrics, MetricsSnapshot};
use crate::prng::SharedPrng;
use crate::stats::{Stat, StatBuffer};
use crate::sync::{AtomicBool, AtomicU64, Ordering, monotonic_nanos};
use crate::table::Table;

/// Reclaimed tables kept per (log size, kind, slots) key.
const TABLE_POOL_DEPTH: usize = 4;

struct RegisteredCache {
    cache: Weak<Cache>,
    /// Hard usage limit charged against the global budget for this shard.
    hard_limit: u64,
}

struct Inner {
    next_id: u64,
    registry: HashMap<u64, RegisteredCache>,
    /// Bytes charged against the global budget: every shard's hard
    /// usage limit plus every live table's footprint.
    accounted: u64,
    table_pool: HashMap<(u32, CacheKind, usize), Vec<Table>>,
}

/// Arbitrates memory across cache shards and schedules their
/// structural maintenance.
pub struct Manager {
    global_limit: u64,
    accepted_cooldown: u64,
    rejected_cooldown: u64,
    ideal_upper_fill_ratio: f64,
    inner: Mutex<Inner>,
    prng: SharedPrng,
    term: AtomicU64,
    metrics: ManagerMetrics,
    shutdown: AtomicBool,
}

/// Builder for [`Manager`].
///
/// # Example
///
/// ```ignore
/// use bucket_cache::Manager;
///
/// let manager = Manager::builder()
///     .global_limit(256 * 1024 * 1024)
///     .build();
/// ```
pub struct ManagerBuilder {
    global_limit: u64,
    prng_seed: Option<u64>,
    accepted_cooldown: Duration,
    rejected_cooldown: Duration,
    ideal_upper_fill_ratio: f64,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            global_limit: 256 * 1024 * 1024,
            prng_seed: None,
            accepted_cooldown: Duration::from_millis(100),
            rejected_cooldown: Duration::from_secs(10),
            ideal_upper_fill_ratio: 0.75,
        }
    }

    /// Total bytes the manager may hand out across all shards
    /// (usage limits plus table memory).
    pub fn global_limit(mut self, bytes: u64) -> Self {
        self.global_limit = bytes;
        self
    }

    /// Fix the shared PRNG seed (deterministic sampling, for tests).
    pub fn prng_seed(mut self, seed: u64) -> Self {
        self.prng_seed = Some(seed);
        self
    }

    /// Cooldown returned with an accepted structural request.
    pub fn accepted_cooldown(mut self, cooldown: Duration) -> Self {
        self.accepted_cooldown = cooldown;
        self
    }

    /// Cooldown returned with a rejected structural request.
    pub fn rejected_cooldown(mut self, cooldown: Duration) -> Self {
        self.rejected_cooldown = cooldown;
        self
    }

    /// Target fill ratio used by [`Cache::size_hint`] to pick a table
    /// size.
    pub fn ideal_upper_fill_ratio(mut self, ratio: f64) -> Self {
        self.ideal_upper_fill_ratio = ratio.clamp(0.05, 1.0);
        self
    }

    /// Build the manager.
    pub fn build(self) -> Arc<Manager> {
        let seed = self.prng_seed.unwrap_or_else(rand::random);
        Arc::new(Manager {
            global_limit: self.global_limit,
            accepted_cooldown: self.accepted_cooldown.as_nanos() as u64,
            rejected_cooldown: self.rejected_cooldown.as_nanos() as u64,
            ideal_upper_fill_ratio: self.ideal_upper_fill_ratio,
            inner: Mutex::new(Inner {
                next_id: 1,
                registry: HashMap::new(),
                accounted: 0,
                table_pool: HashMap::new(),
            }),
            prng: SharedPrng::new(seed),
            term: AtomicU64::new(0),
            metrics: ManagerMetrics::default(),
            shutdown: AtomicBool::new(false),
        })
    }
}

impl Manager {
    /// Start building a manager.
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    /// Whether the manager has begun shutting down.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Create and register a cache shard.
    ///
    /// Charges the shard's hard usage limit plus its initial table
    /// against the global budget; fails with `OverCapacity` if the
    /// budget cannot cover it.
    pub fn create_cache(self: &Arc<Self>, config: CacheConfig) -> CacheResult<Arc<Cache>> {
        if self.is_shutdown() {
            return Err(CacheError::Shutdown);
        }

        let id;
        let table;
        {
            let mut inner = self.inner.lock();
            let candidate =
                Self::pooled_table(&mut inner, config.log_size, config.kind, config.slots_per_bucket)
                    .inspect(|_| {
                        self.metrics.tables_reused.fetch_add(1, Ordering::Relaxed);
                    })
                    .unwrap_or_else(|| {
                        Table::new(config.log_size, config.kind, config.slots_per_bucket)
                    });
            let charge = config.usage_limit + candidate.memory_usage();
            if inner.accounted + charge > self.global_limit {
                Self::pool_table(&mut inner, candidate);
                return Err(CacheError::OverCapacity);
            }
            inner.accounted += charge;
            id = inner.next_id;
            inner.next_id += 1;
            table = Arc::new(candidate);
        }

        let find_stats = config
            .enable_windowed_stats
            .then(|| StatBuffer::new(FIND_STATS_CAPACITY));
        let fixed_size = (std::mem::size_of::<Cache>()
            + find_stats.as_ref().map_or(0, |stats| stats.capacity()))
            as u64;
        let metadata = Metadata::new(config.usage_limit, fixed_size, table.memory_usage());
        let cache = Cache::new(
            Arc::clone(self),
            id,
            config.kind,
            metadata,
            Arc::clone(&table),
            find_stats,
        );

        let mut inner = self.inner.lock();
        inner.registry.insert(
            id,
            RegisteredCache {
                cache: Arc::downgrade(&cache),
                hard_limit: config.usage_limit,
            },
        );
        self.metrics.caches_created.fetch_add(1, Ordering::Relaxed);
        debug!(id, kind = ?config.kind, limit = config.usage_limit, "cache created");
        Ok(cache)
    }

    /// Decide a grow request from `cache`.
    ///
    /// On approval: doubles the shard's hard limit within the global
    /// budget, sets the Resizing flag, and schedules the free-memory
    /// sweep. Returns the decision and the caller's next allowed
    /// request time.
    pub fn request_grow(self: &Arc<Self>, cache: &Cache) -> (bool, u64) {
        let now = monotonic_nanos();
        let rejected = (false, now + self.rejected_cooldown);
        if self.is_shutdown() {
            return rejected;
        }

        let worker;
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let Some(entry) = inner.registry.get_mut(&cache.id()) else {
                return rejected;
            };
            let Some(cache_arc) = entry.cache.upgrade() else {
                return rejected;
            };
            if !cache.can_resize() {
                self.metrics.grows_rejected.fetch_add(1, Ordering::Relaxed);
                return rejected;
            }
            let current = cache.metadata().hard_usage_limit();
            let new_hard = current.saturating_mul(2).max(4096);
            let delta = new_hard - current;
            if inner.accounted + delta > self.global_limit {
                self.metrics.grows_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(id = cache.id(), "grow rejected: global budget exhausted");
                return rejected;
            }
            inner.accounted += delta;
            entry.hard_limit = new_hard;
            cache.metadata().set_usage_limits(new_hard);
            cache.metadata().toggle_resizing();
            self.metrics.grows_approved.fetch_add(1, Ordering::Relaxed);
            debug!(id = cache.id(), new_hard, "grow approved");
            worker = cache_arc;
        }

        let manager = Arc::clone(self);
        spawn_task("resize", move || {
            let under_limit = worker.free_memory();
            worker.metadata().toggle_resizing();
            manager.metrics.sweeps_completed.fetch_add(1, Ordering::Relaxed);
            debug!(id = worker.id(), under_limit, "sweep finished");
        });
        (true, now + self.accepted_cooldown)
    }

    /// Decide a migrate request from `cache` for a table of
    /// `2^requested_log_size` buckets.
    ///
    /// On approval: reserves the new table against the global budget,
    /// sets the Migrating flag, and schedules the migration.
    pub fn request_migrate(self: &Arc<Self>, cache: &Cache, requested_log_size: u32) -> (bool, u64) {
        let now = monotonic_nanos();
        let rejected = (false, now + self.rejected_cooldown);
        if self.is_shutdown() {
            return rejected;
        }
        let Some(current_table) = cache.table() else {
            return rejected;
        };
        if requested_log_size == current_table.log_size() {
            return rejected;
        }

        let worker;
        let new_table;
        {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.registry.get(&cache.id()) else {
                return rejected;
            };
            let Some(cache_arc) = entry.cache.upgrade() else {
                return rejected;
            };
            if !cache.can_resize() {
                self.metrics.migrates_rejected.fetch_add(1, Ordering::Relaxed);
                return rejected;
            }
            let candidate = Self::pooled_table(
                &mut inner,
                requested_log_size,
                cache.kind(),
                current_table.slots_per_bucket(),
            )
            .inspect(|_| {
                self.metrics.tables_reused.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap_or_else(|| {
                Table::new(
                    requested_log_size,
                    cache.kind(),
                    current_table.slots_per_bucket(),
                )
            });
            let new_memory = candidate.memory_usage();
            if inner.accounted + new_memory > self.global_limit {
                Self::pool_table(&mut inner, candidate);
                self.metrics.migrates_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(
                    id = cache.id(),
                    requested_log_size, "migrate rejected: global budget exhausted"
                );
                return rejected;
            }
            inner.accounted += new_memory;
            cache.metadata().toggle_migrating();
            self.metrics.migrates_approved.fetch_add(1, Ordering::Relaxed);
            debug!(
                id = cache.id(),
                from = current_table.log_size(),
                to = requested_log_size,
                pressure = current_table.evictions_signaled(),
                "migrate approved"
            );
            worker = cache_arc;
            new_table = Arc::new(candidate);
        }

        let manager = Arc::clone(self);
        spawn_task("migrate", move || {
            // on failure the cache routes the new table back itself,
            // directly or attached as the auxiliary for shutdown
            if worker.migrate(new_table) {
                manager
                    .metrics
                    .migrates_completed
                    .fetch_add(1, Ordering::Relaxed);
            }
        });
        (true, now + self.accepted_cooldown)
    }

    /// Take a table back from a shard, releasing its budget charge.
    ///
    /// Uniquely-owned tables are cleared and pooled for reuse; shared
    /// ones are cleared and dropped when the last reference goes.
    pub fn reclaim_table(&self, table: Arc<Table>, was_primary: bool) {
        let mut inner = self.inner.lock();
        inner.accounted = inner.accounted.saturating_sub(table.memory_usage());
        match Arc::try_unwrap(table) {
            Ok(owned) => {
                owned.clear();
                Self::pool_table(&mut inner, owned);
            }
            Err(shared) => {
                shared.clear();
                debug!(was_primary, "reclaimed table still shared; dropping");
            }
        }
    }

    /// Record a sampled hit/miss event from a shard.
    pub fn report_hit_stat(&self, stat: Stat) {
        match stat {
            Stat::FindHit => self.metrics.find_hits.fetch_add(1, Ordering::Relaxed),
            Stat::FindMiss => self.metrics.find_misses.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// The PRNG shared by every shard under this manager.
    pub fn shared_prng(&self) -> &SharedPrng {
        &self.prng
    }

    /// Target fill ratio for table sizing.
    pub fn ideal_upper_fill_ratio(&self) -> f64 {
        self.ideal_upper_fill_ratio
    }

    /// Remove a shard from the registry, releasing its usage-limit
    /// charge. Called by [`Cache::shutdown`].
    pub fn unregister_cache(&self, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.registry.remove(&id) {
            inner.accounted = inner.accounted.saturating_sub(entry.hard_limit);
            self.metrics.caches_shut_down.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// The current transactional term.
    pub fn current_term(&self) -> u64 {
        self.term.load(Ordering::Acquire)
    }

    /// Advance the transactional term, expiring every banish list.
    pub fn advance_term(&self) {
        let term = self.term.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(term, "term advanced");
    }

    /// Snapshot of manager-wide counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        let (accounted, registered) = {
            let inner = self.inner.lock();
            (inner.accounted, inner.registry.len() as u64)
        };
        self.metrics.snapshot(accounted, registered)
    }

    /// Bytes currently charged against the global budget.
    pub fn memory_accounted(&self) -> u64 {
        self.inner.lock().accounted
    }

    /// The configured global budget in bytes.
    pub fn global_limit(&self) -> u64 {
        self.global_limit
    }

    /// Shut down every registered shard. Idempotent.
    pub fn shutdown(self: &Arc<Self>) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let caches: Vec<Arc<Cache>> = {
            let inner = self.inner.lock();
            inner
                .registry
                .values()
                .filter_map(|entry| entry.cache.upgrade())
                .collect()
        };
        for cache in caches {
            cache.shutdown();
        }
        debug!("manager shut down");
    }

    fn pooled_table(
        inner: &mut Inner,
        log_size: u32,
        kind: CacheKind,
        slots_per_bucket: usize,
    ) -> Option<Table> {
        inner
            .table_pool
            .get_mut(&(log_size, kind, slots_per_bucket))
            .and_then(Vec::pop)
    }

    fn pool_table(inner: &mut Inner, table: Table) {
        let key = (table.log_size(), table.kind(), table.slots_per_bucket());
        let pool = inner.table_pool.entry(key).or_default();
        if pool.len() < TABLE_POOL_DEPTH {
            pool.push(table);
        }
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("global_limit", &self.global_limit)
            .field("memory_accounted", &self.memory_accounted())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Run a structural task on a named worker thread.
fn spawn_task(name: &str, task: impl FnOnce() + Send + 'static) {
    if let Err(err) = std::thread::Builder::new()
        .name(format!("bucket-cache-{name}"))
        .spawn(task)
    {
        // a leaked structural flag would wedge shutdown, so treat as fatal
        panic!("failed to spawn {name} thread: {err}");
    }
}
