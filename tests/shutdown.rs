//! Shutdown protocol: idempotence, observable values afterward, and
//! quiescing in-flight structural work.

use bucket_cache::{
    Cache, CacheConfig, CacheError, CacheKind, CachedValue, Manager, fingerprint,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const MIB: u64 = 1024 * 1024;

fn manager() -> Arc<Manager> {
    Manager::builder()
        .global_limit(256 * MIB)
        .prng_seed(0x5EED)
        .accepted_cooldown(Duration::ZERO)
        .rejected_cooldown(Duration::ZERO)
        .build()
}

fn make_key(index: usize) -> Vec<u8> {
    format!("key:{:08}", index).into_bytes()
}

fn fill(cache: &Cache, count: usize, value_len: usize) {
    for index in 0..count {
        let key = make_key(index);
        cache
            .insert(fingerprint(&key), CachedValue::new(&key, &vec![0u8; value_len]))
            .unwrap();
    }
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

#[test]
fn test_shutdown_idempotent() {
    let manager = manager();
    let cache = manager
        .create_cache(CacheConfig::new(CacheKind::Plain, MIB))
        .unwrap();
    fill(&cache, 50, 64);

    cache.shutdown();
    let accounted = manager.memory_accounted();
    cache.shutdown();
    assert_eq!(manager.memory_accounted(), accounted);
    assert!(cache.is_shutdown());
}

#[test]
fn test_observable_values_after_shutdown() {
    let manager = manager();
    let cache = manager
        .create_cache(CacheConfig::new(CacheKind::Plain, MIB))
        .unwrap();
    fill(&cache, 50, 64);
    cache.shutdown();

    let key = make_key(1);
    let fp = fingerprint(&key);
    assert!(matches!(cache.find(fp, &key), Err(CacheError::NotFound)));
    assert!(matches!(
        cache.insert(fp, CachedValue::new(&key, b"v")),
        Err(CacheError::Shutdown)
    ));
    assert!(matches!(cache.remove(fp, &key), Err(CacheError::Shutdown)));
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.usage(), 0);
    assert_eq!(cache.usage_limit(), 0);
    assert_eq!(cache.size_and_usage(), (0, 0));
    assert!(!cache.is_resizing());
    assert!(!cache.is_migrating());
    assert!(!cache.can_resize());
    assert!(cache.table().is_none());

    // structural requests become no-ops
    cache.request_grow();
    cache.size_hint(100_000);
    let metrics = manager.metrics();
    assert_eq!(metrics.grows_approved + metrics.grows_rejected, 0);
    assert_eq!(metrics.migrates_approved + metrics.migrates_rejected, 0);
}

#[test]
fn test_shutdown_interrupts_sweep() {
    let manager = manager();
    let cache = manager
        .create_cache(CacheConfig::new(CacheKind::Plain, MIB).initial_log_size(10))
        .unwrap();
    fill(&cache, 600, 1024);
    assert!(cache.usage() > 0);

    // shrink the limits under the live usage and run the sweep the way
    // the manager's worker would
    cache.metadata().set_usage_limits(4096);
    cache.metadata().toggle_resizing();
    let sweeper = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            let _ = cache.free_memory();
            cache.metadata().toggle_resizing();
        })
    };

    thread::sleep(Duration::from_millis(1));
    cache.shutdown();
    sweeper.join().unwrap();

    assert!(cache.is_shutdown());
    assert!(cache.table().is_none());
    assert_eq!(cache.usage(), 0);
}

#[test]
fn test_shutdown_during_migration_releases_everything() {
    let manager = manager();
    let cache = manager
        .create_cache(CacheConfig::new(CacheKind::Plain, 64 * MIB).initial_log_size(10))
        .unwrap();
    fill(&cache, 500, 256);

    cache.request_migrate(14);
    cache.shutdown();

    assert!(cache.table().is_none());
    assert!(
        wait_for(Duration::from_secs(5), || manager.memory_accounted() == 0),
        "all tables and limits must be released after shutdown"
    );
    assert_eq!(manager.metrics().caches_registered, 0);
}

#[test]
fn test_manager_shutdown_covers_all_shards() {
    let manager = manager();
    let plain = manager
        .create_cache(CacheConfig::new(CacheKind::Plain, MIB))
        .unwrap();
    let transactional = manager
        .create_cache(CacheConfig::new(CacheKind::Transactional, MIB))
        .unwrap();
    fill(&plain, 20, 64);

    manager.shutdown();
    assert!(plain.is_shutdown());
    assert!(transactional.is_shutdown());
    assert!(wait_for(Duration::from_secs(5), || {
        manager.memory_accounted() == 0
    }));
    assert!(matches!(
        manager.create_cache(CacheConfig::new(CacheKind::Plain, MIB)),
        Err(CacheError::Shutdown)
    ));
}
