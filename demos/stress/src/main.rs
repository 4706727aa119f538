//! Hammer a shared block cache from many threads and verify what reaches the disk.
//!
//! Every worker repeatedly reads a random block and, with probability `--write-ratio`, increments
//! the little-endian counter stored in the block's first 8 bytes and writes the block back. A
//! ticker thread advances the cache's clock once per millisecond. When all workers are done, the
//! counter stored on disk for every block must equal its starting value plus the number of writes
//! issued for it: a lost update means two buffers held the same block at once (or a holder did not
//! have the buffer to itself).
//!
//! # Usage
//!
//! ```sh
//! cargo run --release --bin bcache-stress -- --threads 8 --ops 100000 --blocks 64 --buffers 30 --shards 13
//! ```
//!
//! Pass `--image <path>` to back the cache with an image file instead of memory. Counters already
//! in the image are read before the run and taken into account.

use bcache::{disk, BlockId, Cache, Config, Disk, Error, Ticks};
use clap::{value_parser, Arg, Command};
use prometheus_client::{encoding::text::encode, registry::Registry};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{error, info, warn};

/// The device all blocks live on.
const DEVICE: u32 = 0;

/// How often the ticker advances the clock.
const TICK: Duration = Duration::from_millis(1);

/// Read the counter stored at the front of a block.
fn counter(data: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[..8]);
    u64::from_le_bytes(raw)
}

fn main() {
    // Parse arguments
    let matches = Command::new("bcache-stress")
        .about("hammer a shared block cache and verify what reaches the disk")
        .arg(
            Arg::new("threads")
                .long("threads")
                .default_value("8")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("ops")
                .long("ops")
                .default_value("10000")
                .value_parser(value_parser!(usize))
                .help("Operations per thread"),
        )
        .arg(
            Arg::new("blocks")
                .long("blocks")
                .default_value("64")
                .value_parser(value_parser!(u32))
                .help("Number of distinct blocks touched"),
        )
        .arg(
            Arg::new("buffers")
                .long("buffers")
                .required(false)
                .value_parser(value_parser!(usize))
                .help("Number of buffers (defaults to NBUF)"),
        )
        .arg(
            Arg::new("shards")
                .long("shards")
                .required(false)
                .value_parser(value_parser!(usize))
                .help("Number of shards (defaults to NBUCKET)"),
        )
        .arg(
            Arg::new("block-size")
                .long("block-size")
                .required(false)
                .value_parser(value_parser!(usize))
                .help("Block size in bytes (defaults to BSIZE)"),
        )
        .arg(
            Arg::new("write-ratio")
                .long("write-ratio")
                .default_value("0.5")
                .value_parser(value_parser!(f64))
                .help("Probability that an operation writes the block back"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .default_value("0")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("image")
                .long("image")
                .required(false)
                .help("Back the cache with this image file instead of memory"),
        )
        .get_matches();

    // Create logger
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Configure run
    let threads = *matches.get_one::<usize>("threads").unwrap();
    let ops = *matches.get_one::<usize>("ops").unwrap();
    let blocks = *matches.get_one::<u32>("blocks").unwrap();
    let block_size = matches
        .get_one::<usize>("block-size")
        .copied()
        .unwrap_or(bcache::BSIZE);
    let write_ratio = *matches.get_one::<f64>("write-ratio").unwrap();
    let seed = *matches.get_one::<u64>("seed").unwrap();
    if blocks == 0 {
        panic!("Please provide at least one block");
    }
    if block_size < 8 {
        panic!("Block size must fit a counter (8 bytes)");
    }
    if !(0.0..=1.0).contains(&write_ratio) {
        panic!("Write ratio must be between 0 and 1");
    }

    // Configure disk
    let disk: Arc<dyn Disk> = match matches.get_one::<String>("image") {
        Some(path) => {
            let image = disk::File::open(DEVICE, path).expect("Could not open image");
            info!(path = %path, "using image");
            Arc::new(image)
        }
        None => Arc::new(disk::Memory::default()),
    };

    // Configure cache
    let ticks = Ticks::new();
    let cfg = Config {
        shards: matches
            .get_one::<usize>("shards")
            .copied()
            .unwrap_or(bcache::NBUCKET),
        buffers: matches
            .get_one::<usize>("buffers")
            .copied()
            .unwrap_or(bcache::NBUF),
        block_size,
        ticks: ticks.clone(),
        ..Config::default()
    };
    info!(
        threads,
        ops,
        blocks,
        shards = cfg.shards,
        buffers = cfg.buffers,
        block_size,
        write_ratio,
        "starting"
    );
    let cache = Cache::new(cfg, disk.clone());
    let mut registry = Registry::with_prefix("bcache");
    cache.register(&mut registry);

    // Record the counters already on disk
    let mut scratch = vec![0u8; block_size];
    let initial: Vec<u64> = (0..blocks)
        .map(|n| {
            disk.read(BlockId::new(DEVICE, n), &mut scratch)
                .expect("Could not read initial counter");
            counter(&scratch)
        })
        .collect();

    // Run workers
    let issued: Vec<AtomicU64> = (0..blocks).map(|_| AtomicU64::new(0)).collect();
    let exhausted = AtomicU64::new(0);
    let done = AtomicBool::new(false);
    let start = Instant::now();
    thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::Relaxed) {
                thread::sleep(TICK);
                ticks.tick();
            }
        });

        let workers: Vec<_> = (0..threads)
            .map(|t| {
                let (cache, issued, exhausted) = (&cache, &issued, &exhausted);
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                    for _ in 0..ops {
                        let n = rng.gen_range(0..blocks);
                        let mut buf = match cache.read(BlockId::new(DEVICE, n)) {
                            Ok(buf) => buf,
                            Err(Error::NoBuffers) => {
                                exhausted.fetch_add(1, Ordering::Relaxed);
                                thread::yield_now();
                                continue;
                            }
                            Err(err) => panic!("read failed: {err}"),
                        };
                        if rng.gen_bool(write_ratio) {
                            let next = counter(&buf) + 1;
                            buf[..8].copy_from_slice(&next.to_le_bytes());
                            cache.write(&buf).expect("write failed");
                            issued[n as usize].fetch_add(1, Ordering::Relaxed);
                        }
                        cache.release(buf);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }
        done.store(true, Ordering::Relaxed);
    });
    let elapsed = start.elapsed();

    // Verify every issued write reached the disk
    let mut lost = 0;
    for n in 0..blocks {
        let block = BlockId::new(DEVICE, n);
        disk.read(block, &mut scratch)
            .expect("Could not read final counter");
        let expected = initial[n as usize] + issued[n as usize].load(Ordering::Relaxed);
        let actual = counter(&scratch);
        if actual != expected {
            error!(%block, expected, actual, "counter mismatch");
            lost += 1;
        }
    }
    let exhausted = exhausted.load(Ordering::Relaxed);
    if exhausted > 0 {
        warn!(exhausted, "operations skipped for lack of buffers");
    }
    let writes: u64 = issued.iter().map(|w| w.load(Ordering::Relaxed)).sum();
    info!(
        elapsed = ?elapsed,
        writes,
        ticks = ticks.now(),
        "finished"
    );

    let mut buffer = String::new();
    encode(&mut buffer, &registry).expect("Could not encode metrics");
    println!("{buffer}");

    if lost > 0 {
        panic!("{lost} blocks lost updates");
    }
    info!(blocks, "verified");
}
