//! Move block contents between a buffer and the device that backs it.
//!
//! The [crate::Cache] never interprets block contents and never touches a device directly. It calls
//! a [Disk] to fill a buffer on a read miss and to flush a buffer on [crate::Cache::write].
//!
//! Two implementations are provided:
//! - [Memory] keeps blocks in a map and counts transfers (useful for tests and simulation).
//! - [File] maps each device to an image file and uses positional I/O.

use crate::{BlockId, Error};
use std::sync::Arc;

mod file;
mod memory;
pub use file::File;
pub use memory::Memory;

/// A blocking, synchronous block device.
///
/// The length of `buf` is the block size. Both calls only return once the entire block has been
/// transferred.
pub trait Disk: Send + Sync {
    /// Fill `buf` with the contents of `block`.
    fn read(&self, block: BlockId, buf: &mut [u8]) -> Result<(), Error>;

    /// Persist `buf` as the contents of `block`.
    fn write(&self, block: BlockId, buf: &[u8]) -> Result<(), Error>;
}

impl<D: Disk + ?Sized> Disk for Arc<D> {
    fn read(&self, block: BlockId, buf: &mut [u8]) -> Result<(), Error> {
        (**self).read(block, buf)
    }

    fn write(&self, block: BlockId, buf: &[u8]) -> Result<(), Error> {
        (**self).write(block, buf)
    }
}
