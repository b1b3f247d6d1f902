//! bucket-cache: concurrent in-memory cache shards with online rehash.
//!
//! This crate provides sharded fingerprint-indexed caches built from
//! fixed-size buckets, coordinated by a [`Manager`] that arbitrates a
//! global memory budget and schedules structural maintenance:
//!
//! - **CachedValue / Finding**: owned key/value payloads and the read
//!   handles that keep them alive past eviction
//! - **Table**: power-of-two bucket array with per-bucket locks and an
//!   auxiliary table attached during migration
//! - **Cache**: the shard - lookup/insert/remove, eviction-rate
//!   feedback, free-memory sweeps, online migration, shutdown
//! - **Manager**: global budget, grow/migrate decisions with cooldowns,
//!   table pooling, hit-stat aggregation, the transactional term
//!
//! # Architecture
//!
//! ```text
//!                  +---------------------------+
//!                  |          Manager          |
//!                  | budget / pool / decisions |
//!                  +------+-------------+------+
//!                         |             |
//!            requestGrow /|             |\ freeMemory
//!          requestMigrate |             |  migrate
//!                         v             v
//!               +------------+   +------------+
//!               |  Cache #1  |   |  Cache #2  |  ...
//!               +-----+------+   +------------+
//!                     |
//!                     v
//!               +------------+     +------------+
//!               |   Table    | --> | auxiliary  | (during migration)
//!               | [buckets]  |     | [buckets]  |
//!               +------------+     +------------+
//! ```
//!
//! # Example
//!
//! ```ignore
//! use bucket_cache::{CacheConfig, CacheKind, CachedValue, Manager, fingerprint};
//!
//! let manager = Manager::builder()
//!     .global_limit(256 * 1024 * 1024)
//!     .build();
//! let cache = manager.create_cache(CacheConfig::new(CacheKind::Plain, 16 * 1024 * 1024))?;
//!
//! let fp = fingerprint(b"answer");
//! cache.insert(fp, CachedValue::new(b"answer", b"42"))?;
//! let finding = cache.find(fp, b"answer")?;
//! assert_eq!(finding.value(), b"42");
//! ```
//!
//! Lookups during a migration see consistent state: a key present
//! before the migration is found in the primary or the auxiliary table.
//! Reads never block beyond a bounded spin on the bucket lock.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod config;
mod error;
mod manager;
mod metadata;
mod metrics;
mod prng;
mod stats;
mod sync;
mod table;
mod value;

pub use cache::Cache;
pub use config::{
    CacheConfig, CacheKind, FIND_STATS_CAPACITY, MAX_LOG_SIZE, MAX_SLOTS_PER_BUCKET, MIN_LOG_SIZE,
    STANDARD_SLOTS_PER_BUCKET, TRANSACTIONAL_SLOTS_PER_BUCKET,
};
pub use error::{CacheError, CacheResult};
pub use manager::{Manager, ManagerBuilder};
pub use metadata::Metadata;
pub use metrics::MetricsSnapshot;
pub use prng::SharedPrng;
pub use stats::{Stat, StatBuffer};
pub use table::Table;
pub use value::{CachedValue, Finding};

use std::sync::OnceLock;

/// Fingerprint a key: the top 32 bits of a keyed 64-bit hash.
///
/// The cache core itself is fingerprint-agnostic; this helper exists so
/// callers without their own key hashing get a suitable one. Stable
/// within a process only.
pub fn fingerprint(key: &[u8]) -> u32 {
    static HASHER: OnceLock<ahash::RandomState> = OnceLock::new();
    let hasher = HASHER.get_or_init(|| {
        ahash::RandomState::with_seeds(
            0x243f_6a88_85a3_08d3,
            0x1319_8a2e_0370_7344,
            0xa409_3822_299f_31d0,
            0x082e_fa98_ec4e_6c89,
        )
    });
    (hasher.hash_one(key) >> 32) as u32
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_spreads() {
        assert_eq!(fingerprint(b"key"), fingerprint(b"key"));
        // distinct keys should not all collapse to one bucket prefix
        let prefixes: std::collections::HashSet<u32> = (0u32..64)
            .map(|i| fingerprint(i.to_be_bytes().as_slice()) >> 24)
            .collect();
        assert!(prefixes.len() > 8);
    }
}
