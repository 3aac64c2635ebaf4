//! # Blockstore Benchmarks
//!
//! Put/get throughput of the base blockstore and the cost of `has` misses
//! with and without the Bloom layer.

use std::sync::Arc;

use bx_01_blockstore::{cached_blockstore, BaseBlockstore, Blockstore, CacheOpts};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use shared_types::test_utils::random_blocks;
use shared_types::MemoryDatastore;
use tokio_util::sync::CancellationToken;

fn bench_put_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("blockstore");

    group.bench_function("put_100x1KiB", |b| {
        b.iter_batched(
            || (BaseBlockstore::new(MemoryDatastore::new()), random_blocks(100, 1024)),
            |(store, blocks)| {
                for block in blocks {
                    store.put(block).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });

    let store = BaseBlockstore::new(MemoryDatastore::new());
    let blocks = random_blocks(1000, 1024);
    store.put_many(blocks.clone()).unwrap();
    group.bench_function("get_hit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % blocks.len();
            black_box(store.get(blocks[i].cid()).unwrap())
        })
    });

    group.finish();
}

fn bench_has_miss(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let stored = random_blocks(10_000, 64);
    let absent = random_blocks(1000, 64);

    let plain: Arc<dyn Blockstore> = Arc::new(BaseBlockstore::new(MemoryDatastore::new()));
    plain.put_many(stored.clone()).unwrap();

    let base = BaseBlockstore::new(MemoryDatastore::new());
    base.put_many(stored).unwrap();
    let cached = runtime.block_on(async {
        let cached = cached_blockstore(base, &CacheOpts::default(), CancellationToken::new()).unwrap();
        cached.wait_ready().await;
        cached
    });

    let mut group = c.benchmark_group("has_miss");
    group.bench_function("datastore", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % absent.len();
            black_box(plain.has(absent[i].cid()).unwrap())
        })
    });
    group.bench_function("bloom", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % absent.len();
            black_box(cached.has(absent[i].cid()).unwrap())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_put_get, bench_has_miss);
criterion_main!(benches);
