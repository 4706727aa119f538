//! Share a fixed pool of block buffers between concurrent callers.
//!
//! A [Cache] sits between a [Disk] and the layer above it (usually a filesystem). Given a
//! [BlockId] it hands back a [Buf]: an in-memory copy of that block that the caller holds
//! exclusively until it is released. Reusing cached copies avoids disk I/O, and because there is
//! never more than one buffer per block, the cache is also the point at which concurrent users of
//! a block synchronize.
//!
//! # Interface
//!
//! - To get a buffer for a particular block, call [Cache::read].
//! - After changing buffer data, call [Cache::write] to write it to disk.
//! - When done with the buffer, call [Cache::release] (or drop it).
//! - Only one caller at a time can hold a buffer, so do not keep them longer than necessary.
//! - To keep a block resident across several hold/release cycles, [Cache::pin] it.
//!
//! # Example
//!
//! ```rust
//! use bcache::{disk, BlockId, Cache, Config};
//!
//! let cache = Cache::new(Config::default(), disk::Memory::default());
//! let block = BlockId::new(1, 5);
//!
//! // Update the block and flush it to disk.
//! let mut buf = cache.read(block).unwrap();
//! buf[..5].copy_from_slice(b"hello");
//! cache.write(&buf).unwrap();
//! cache.release(buf);
//!
//! // The next read is served from memory.
//! let buf = cache.read(block).unwrap();
//! assert_eq!(&buf[..5], b"hello");
//! assert_eq!(cache.disk().reads(), 1);
//! ```
//!
//! # Status
//!
//! `bcache` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use std::{fmt, io::Error as IoError};
use thiserror::Error;

mod cache;
pub use cache::{Buf, Cache, Config, Pinned, BSIZE, NBUCKET, NBUF};
pub mod disk;
pub use disk::Disk;
mod metrics;
pub mod sleeplock;
mod ticks;
pub use ticks::Ticks;

/// Errors that can occur when interacting with the [Cache] or a [Disk].
#[derive(Error, Debug)]
pub enum Error {
    #[error("no buffers")]
    NoBuffers,
    #[error("device missing: {0}")]
    DeviceMissing(u32),
    #[error("block size mismatch: expected {expected} bytes, got {actual}")]
    BlockSizeMismatch { expected: usize, actual: usize },
    #[error("offset overflow")]
    OffsetOverflow,
    #[error("io error: {0}")]
    Io(#[from] IoError),
}

/// The identity of a block on some device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId {
    /// The device the block lives on.
    pub device: u32,
    /// The index of the block within the device.
    pub number: u32,
}

impl BlockId {
    pub const fn new(device: u32, number: u32) -> Self {
        Self { device, number }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.number)
    }
}
