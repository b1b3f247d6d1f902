//! Cache configuration and tuning constants.

/// Minimum table size exponent (2^8 = 256 buckets).
pub const MIN_LOG_SIZE: u32 = 8;

/// Maximum table size exponent (2^32 buckets).
pub const MAX_LOG_SIZE: u32 = 32;

/// Slots per bucket for plain caches.
pub const STANDARD_SLOTS_PER_BUCKET: usize = 5;

/// Slots per bucket for transactional caches.
///
/// Smaller than the plain layout because each transactional bucket also
/// carries a banish list sized to match.
pub const TRANSACTIONAL_SLOTS_PER_BUCKET: usize = 3;

/// Hard cap on configurable slots per bucket.
pub const MAX_SLOTS_PER_BUCKET: usize = 8;

/// Spin-try budget for fast-path bucket acquisition (find/insert).
pub const TRIES_FAST: u64 = 50;

/// Spin-try budget for slow-path acquisition (remove, structural work).
pub const TRIES_SLOW: u64 = 10_000;

/// Soft usage limit as a fraction of the hard limit.
pub const SOFT_LIMIT_RATIO: f64 = 0.9;

/// Eviction rate above which a sampled insert requests a migrate.
pub const EVICTION_RATE_THRESHOLD: f64 = 0.10;

/// Mask selecting 1-in-128 inserts for the eviction-rate check.
pub const EVICTION_CHECK_MASK: u64 = 0x7F;

/// Mask selecting 1-in-8 finds for stat recording.
pub const STAT_SAMPLE_MASK: u64 = 0x7;

/// Capacity of the windowed find-stat reservoir.
pub const FIND_STATS_CAPACITY: usize = 16_384;

/// The cache variant, fixed at construction.
///
/// Both variants share the core table and orchestration; the transactional
/// variant additionally tracks a per-bucket banish list scoped to the
/// manager's current term (see [`Cache::banish`](crate::Cache::banish)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Plain cache: no banish support, five slots per bucket.
    Plain,
    /// Transactional cache: banish list per bucket, three slots per bucket.
    Transactional,
}

impl CacheKind {
    /// Default slots per bucket for this variant.
    pub fn default_slots_per_bucket(self) -> usize {
        match self {
            CacheKind::Plain => STANDARD_SLOTS_PER_BUCKET,
            CacheKind::Transactional => TRANSACTIONAL_SLOTS_PER_BUCKET,
        }
    }
}

/// Configuration for a single cache shard.
///
/// # Example
///
/// ```ignore
/// use bucket_cache::{CacheConfig, CacheKind};
///
/// let config = CacheConfig::new(CacheKind::Plain, 64 * 1024 * 1024)
///     .initial_log_size(10)
///     .windowed_stats(true);
/// let cache = manager.create_cache(config)?;
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub(crate) kind: CacheKind,
    pub(crate) usage_limit: u64,
    pub(crate) log_size: u32,
    pub(crate) slots_per_bucket: usize,
    pub(crate) enable_windowed_stats: bool,
}

impl CacheConfig {
    /// Create a configuration with the given variant and hard usage limit
    /// in bytes. The soft limit is derived ([`SOFT_LIMIT_RATIO`]).
    pub fn new(kind: CacheKind, usage_limit: u64) -> Self {
        Self {
            kind,
            usage_limit,
            log_size: MIN_LOG_SIZE,
            slots_per_bucket: kind.default_slots_per_bucket(),
            enable_windowed_stats: true,
        }
    }

    /// Set the initial table size exponent, clamped to
    /// [`MIN_LOG_SIZE`]..=[`MAX_LOG_SIZE`].
    pub fn initial_log_size(mut self, log_size: u32) -> Self {
        self.log_size = log_size.clamp(MIN_LOG_SIZE, MAX_LOG_SIZE);
        self
    }

    /// Override slots per bucket, clamped to 1..=[`MAX_SLOTS_PER_BUCKET`].
    pub fn slots_per_bucket(mut self, slots: usize) -> Self {
        self.slots_per_bucket = slots.clamp(1, MAX_SLOTS_PER_BUCKET);
        self
    }

    /// Enable or disable the windowed hit-rate reservoir.
    pub fn windowed_stats(mut self, enable: bool) -> Self {
        self.enable_windowed_stats = enable;
        self
    }
}
