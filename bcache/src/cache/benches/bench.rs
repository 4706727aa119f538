use bcache::{disk::Memory, Cache, Config};
use criterion::criterion_main;

mod miss;

criterion_main!(hit::benches, miss::benches, contended::benches);

/// Block size used by every benchmark.
const BLOCK_SIZE: usize = 512;

/// Create a cache over an empty in-memory disk.
fn new_cache(shards: usize, buffers: usize) -> Cache<Memory> {
    Cache::new(
        Config {
            shards,
            buffers,
            block_size: BLOCK_SIZE,
            ..Config::default()
        },
        Memory::default(),
    )
}
