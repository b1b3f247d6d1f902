//! Online migration: size hints, eviction-pressure feedback, concurrent
//! lookups during rehash, and request cooldowns.

use bucket_cache::{
    Cache, CacheConfig, CacheError, CacheKind, CachedValue, Finding, Manager, fingerprint,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const MIB: u64 = 1024 * 1024;

/// Manager with cooldowns disabled so tests can drive repeated
/// structural requests.
fn eager_manager() -> Arc<Manager> {
    Manager::builder()
        .global_limit(1024 * MIB)
        .prng_seed(0x5EED)
        .accepted_cooldown(Duration::ZERO)
        .rejected_cooldown(Duration::ZERO)
        .build()
}

fn make_key(index: usize) -> Vec<u8> {
    format!("key:{:08}", index).into_bytes()
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

fn find_with_retry(cache: &Cache, fp: u32, key: &[u8]) -> Result<Finding, CacheError> {
    loop {
        match cache.find(fp, key) {
            Err(CacheError::BucketBusy) => thread::yield_now(),
            other => return other,
        }
    }
}

fn insert_with_retry(cache: &Cache, fp: u32, key: &[u8], value: &[u8]) {
    loop {
        match cache.insert(fp, CachedValue::new(key, value)) {
            Err(CacheError::BucketBusy) => thread::yield_now(),
            other => {
                other.unwrap();
                return;
            }
        }
    }
}

fn table_log_size(cache: &Cache) -> Option<u32> {
    cache.table().map(|table| table.log_size())
}

#[test]
fn test_size_hint_migrates_to_target() {
    let manager = eager_manager();
    let cache = manager
        .create_cache(CacheConfig::new(CacheKind::Plain, 64 * MIB))
        .unwrap();

    for index in 0..100 {
        let key = make_key(index);
        insert_with_retry(&cache, fingerprint(&key), &key, b"v");
    }

    // 10,000 / (5 slots * 0.75 fill) = 2,667 buckets -> 2^12
    cache.size_hint(10_000);
    assert!(
        wait_for(Duration::from_secs(5), || table_log_size(&cache) == Some(12)),
        "table should migrate to 2^12 buckets"
    );
    assert!(!cache.is_migrating());

    for index in 0..100 {
        let key = make_key(index);
        assert!(find_with_retry(&cache, fingerprint(&key), &key).is_ok());
    }

    cache.shutdown();
}

#[test]
fn test_eviction_pressure_triggers_migrate() {
    let manager = eager_manager();
    let cache = manager
        .create_cache(CacheConfig::new(CacheKind::Plain, 64 * MIB))
        .unwrap();
    assert_eq!(table_log_size(&cache), Some(8));

    // 10,000 inserts into 256 buckets * 5 slots: heavy eviction, and the
    // sampled rate check requests progressively larger tables
    for index in 0..10_000 {
        let key = make_key(index);
        insert_with_retry(&cache, fingerprint(&key), &key, &[0u8; 32]);
    }

    assert!(
        wait_for(Duration::from_secs(5), || {
            table_log_size(&cache).is_some_and(|log_size| log_size > 8) && !cache.is_migrating()
        }),
        "eviction pressure should grow the table"
    );
    assert!(manager.metrics().migrates_approved >= 1);

    cache.shutdown();
}

#[test]
fn test_lookups_during_migration_see_every_key() {
    let manager = eager_manager();
    let cache = manager
        .create_cache(CacheConfig::new(CacheKind::Plain, 64 * MIB).initial_log_size(11))
        .unwrap();

    let keys = 1000usize;
    for index in 0..keys {
        let key = make_key(index);
        let evicted = cache
            .insert(fingerprint(&key), CachedValue::new(&key, b"stable"))
            .unwrap();
        assert!(!evicted);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let missing = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for worker in 0..4 {
        let cache = Arc::clone(&cache);
        let stop = Arc::clone(&stop);
        let missing = Arc::clone(&missing);
        readers.push(thread::spawn(move || {
            let mut index = worker * 251;
            while !stop.load(Ordering::Relaxed) {
                let key = make_key(index % keys);
                if find_with_retry(&cache, fingerprint(&key), &key).is_err() {
                    missing.store(true, Ordering::Relaxed);
                }
                index += 1;
            }
        }));
    }

    cache.size_hint(40_000); // -> 2^14
    assert!(wait_for(Duration::from_secs(10), || {
        table_log_size(&cache) == Some(14) && !cache.is_migrating()
    }));

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }
    assert!(
        !missing.load(Ordering::Relaxed),
        "no lookup may spuriously miss during migration"
    );

    for index in 0..keys {
        let key = make_key(index);
        assert!(find_with_retry(&cache, fingerprint(&key), &key).is_ok());
    }

    cache.shutdown();
}

#[test]
fn test_migration_preserves_contents_and_usage() {
    let manager = eager_manager();
    let cache = manager
        .create_cache(CacheConfig::new(CacheKind::Plain, 64 * MIB).initial_log_size(10))
        .unwrap();

    for index in 0..500 {
        let key = make_key(index);
        let evicted = cache
            .insert(fingerprint(&key), CachedValue::new(&key, b"carried"))
            .unwrap();
        assert!(!evicted);
    }
    let usage_before = cache.usage();

    cache.request_migrate(13);
    assert!(wait_for(Duration::from_secs(5), || {
        table_log_size(&cache) == Some(13) && !cache.is_migrating()
    }));

    assert_eq!(cache.usage(), usage_before);
    for index in 0..500 {
        let key = make_key(index);
        let finding = find_with_retry(&cache, fingerprint(&key), &key).unwrap();
        assert_eq!(finding.value(), b"carried");
    }

    cache.shutdown();
}

#[test]
fn test_shrink_migration() {
    let manager = eager_manager();
    let cache = manager
        .create_cache(CacheConfig::new(CacheKind::Plain, 64 * MIB).initial_log_size(10))
        .unwrap();

    for index in 0..120 {
        let key = make_key(index);
        insert_with_retry(&cache, fingerprint(&key), &key, b"v");
    }

    cache.request_migrate(8);
    assert!(wait_for(Duration::from_secs(5), || {
        table_log_size(&cache) == Some(8) && !cache.is_migrating()
    }));

    for index in 0..120 {
        let key = make_key(index);
        assert!(find_with_retry(&cache, fingerprint(&key), &key).is_ok());
    }

    cache.shutdown();
}

#[test]
fn test_cooldown_limits_manager_calls() {
    let manager = Manager::builder()
        .global_limit(1024 * MIB)
        .prng_seed(0x5EED)
        .accepted_cooldown(Duration::from_secs(10))
        .rejected_cooldown(Duration::from_secs(10))
        .build();
    let cache = manager
        .create_cache(CacheConfig::new(CacheKind::Plain, MIB))
        .unwrap();

    for _ in 0..1000 {
        cache.request_grow();
    }
    let metrics = manager.metrics();
    assert_eq!(
        metrics.grows_approved + metrics.grows_rejected,
        1,
        "repeated requests inside the cooldown reach the manager once"
    );

    for _ in 0..1000 {
        cache.request_migrate(12);
    }
    let metrics = manager.metrics();
    assert_eq!(metrics.migrates_approved + metrics.migrates_rejected, 1);

    cache.shutdown();
}
