//! Benchmarks for cache shard operations.
//!
//! Run with: cargo bench --bench cache

use bucket_cache::{CacheConfig, CacheKind, CachedValue, Manager, fingerprint};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

/// Generate a key from an index.
fn make_key(index: usize) -> Vec<u8> {
    format!("key:{:016x}", index).into_bytes()
}

/// Benchmark insert operations at a couple of table sizes.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/insert");

    for power in [10, 14] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("single", format!("2^{}", power)),
            &power,
            |b, &power| {
                let manager = Manager::builder()
                    .global_limit(1024 * 1024 * 1024)
                    .prng_seed(0xB0B)
                    .build();
                let cache = manager
                    .create_cache(
                        CacheConfig::new(CacheKind::Plain, 512 * 1024 * 1024)
                            .initial_log_size(power),
                    )
                    .unwrap();
                let mut index = 0usize;

                b.iter(|| {
                    let key = make_key(index);
                    let fp = fingerprint(&key);
                    let _ = black_box(cache.insert(fp, CachedValue::new(black_box(&key), b"value")));
                    index = index.wrapping_add(1);
                });

                cache.shutdown();
            },
        );
    }

    group.finish();
}

/// Benchmark lookups that hit.
fn bench_find_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/find_hit");
    let num_items = 10_000usize;

    group.throughput(Throughput::Elements(1));
    group.bench_function("single", |b| {
        let manager = Manager::builder()
            .global_limit(1024 * 1024 * 1024)
            .prng_seed(0xB0B)
            .build();
        let cache = manager
            .create_cache(
                CacheConfig::new(CacheKind::Plain, 512 * 1024 * 1024).initial_log_size(14),
            )
            .unwrap();
        for index in 0..num_items {
            let key = make_key(index);
            cache
                .insert(fingerprint(&key), CachedValue::new(&key, b"value"))
                .unwrap();
        }
        let mut index = 0usize;

        b.iter(|| {
            let key = make_key(index % num_items);
            let _ = black_box(cache.find(fingerprint(&key), black_box(&key)));
            index = index.wrapping_add(1);
        });

        cache.shutdown();
    });

    group.finish();
}

/// Benchmark lookups that miss.
fn bench_find_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/find_miss");

    group.throughput(Throughput::Elements(1));
    group.bench_function("single", |b| {
        let manager = Manager::builder()
            .global_limit(1024 * 1024 * 1024)
            .prng_seed(0xB0B)
            .build();
        let cache = manager
            .create_cache(
                CacheConfig::new(CacheKind::Plain, 512 * 1024 * 1024).initial_log_size(14),
            )
            .unwrap();
        let mut index = 0usize;

        b.iter(|| {
            let key = make_key(index);
            let _ = black_box(cache.find(fingerprint(&key), black_box(&key)));
            index = index.wrapping_add(1);
        });

        cache.shutdown();
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_find_hit, bench_find_miss);
criterion_main!(benches);
