use super::new_cache;
use bcache::BlockId;
use criterion::{black_box, criterion_group, Criterion};

/// Number of buffers in the cache.
const BUFFERS: usize = 30;

/// Cycle through twice as many blocks as there are buffers, so every read recycles (or steals)
/// the least recently used buffer.
fn bench_miss(c: &mut Criterion) {
    for shards in [1, 4, 13] {
        let cache = new_cache(shards, BUFFERS);
        let blocks = 2 * BUFFERS as u32;

        let mut next = 0u32;
        c.bench_function(
            &format!("{}/shards={} blocks={}", module_path!(), shards, blocks),
            |b| {
                b.iter(|| {
                    let buf = cache.read(BlockId::new(1, next)).unwrap();
                    black_box(buf[0]);
                    cache.ticks().tick();
                    cache.release(buf);
                    next = (next + 1) % blocks;
                })
            },
        );
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_miss
}
