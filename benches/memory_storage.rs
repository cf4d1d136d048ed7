//! Benchmarks for the memory layer and the layered manager
//!
//! Target: sub-microsecond memory hits, eviction cost independent of size

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layered_cache::cache::storage::CacheStorage;
use layered_cache::{
    CacheEntry, CacheLayer, CacheManager, EvictionPolicy, MemoryStorage, MemoryStorageConfig,
    SetOptions,
};
use serde_json::json;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(300);

fn bench_memory_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_storage");
    group.throughput(Throughput::Elements(1));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let storage = MemoryStorage::new();
    rt.block_on(async {
        for i in 0..10_000 {
            let _ = storage
                .set(&format!("key-{:05}", i), CacheEntry::new(json!({"id": i}), TTL))
                .await;
        }
    });

    group.bench_function("get_hit", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let key = format!("key-{:05}", counter % 10_000);
            rt.block_on(async { black_box(storage.get(&key).await) })
        });
    });

    group.bench_function("get_miss", |b| {
        b.iter(|| rt.block_on(async { black_box(storage.get("absent").await) }));
    });

    group.finish();
}

fn bench_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_eviction");
    group.throughput(Throughput::Elements(1));
    let rt = tokio::runtime::Runtime::new().unwrap();

    for policy in [
        EvictionPolicy::Lru,
        EvictionPolicy::Lfu,
        EvictionPolicy::Fifo,
        EvictionPolicy::Ttl,
    ] {
        let storage = MemoryStorage::with_config(MemoryStorageConfig::with_max_size(1_000, policy));
        group.bench_with_input(BenchmarkId::new("set_at_capacity", policy), &storage, |b, storage| {
            let mut counter = 0u64;
            b.iter(|| {
                counter += 1;
                let key = format!("key-{}", counter);
                rt.block_on(async {
                    let _ = storage
                        .set(black_box(&key), CacheEntry::new(json!(counter), TTL))
                        .await;
                })
            });
        });
    }

    group.finish();
}

fn bench_manager_layers(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_manager");
    group.throughput(Throughput::Elements(1));
    let rt = tokio::runtime::Runtime::new().unwrap();

    let manager = CacheManager::default();
    let _ = manager.add_layer(CacheLayer::new("l1", MemoryStorage::new(), 100));
    let _ = manager.add_layer(CacheLayer::new("l2", MemoryStorage::new(), 10));
    rt.block_on(async {
        for i in 0..1_000 {
            let _ = manager
                .set(&format!("{}", i), json!(i), SetOptions::default(), Some("bench"))
                .await;
        }
    });

    group.bench_function("two_layer_get", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let key = format!("{}", counter % 1_000);
            rt.block_on(async { black_box(manager.get(&key, Some("bench")).await) })
        });
    });

    group.bench_function("two_layer_set", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let key = format!("{}", counter % 1_000);
            rt.block_on(async {
                let _ = manager
                    .set(black_box(&key), json!(counter), SetOptions::default(), Some("bench"))
                    .await;
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_memory_get, bench_eviction, bench_manager_layers);
criterion_main!(benches);
