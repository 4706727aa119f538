use super::Disk;
use crate::{BlockId, Error};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

/// In-memory devices.
///
/// Blocks that were never written read back as zeros.
#[derive(Default)]
pub struct Memory {
    blocks: Mutex<HashMap<BlockId, Vec<u8>>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Memory {
    /// Number of completed read transfers.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of completed write transfers.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Return the stored contents of `block` without counting a transfer.
    pub fn get(&self, block: BlockId) -> Option<Vec<u8>> {
        self.blocks.lock().unwrap().get(&block).cloned()
    }

    /// Store `data` as the contents of `block` without counting a transfer.
    pub fn put(&self, block: BlockId, data: Vec<u8>) {
        self.blocks.lock().unwrap().insert(block, data);
    }
}

impl Disk for Memory {
    fn read(&self, block: BlockId, buf: &mut [u8]) -> Result<(), Error> {
        {
            let blocks = self.blocks.lock().unwrap();
            match blocks.get(&block) {
                Some(data) if data.len() != buf.len() => {
                    return Err(Error::BlockSizeMismatch {
                        expected: buf.len(),
                        actual: data.len(),
                    });
                }
                Some(data) => buf.copy_from_slice(data),
                None => buf.fill(0),
            }
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write(&self, block: BlockId, buf: &[u8]) -> Result<(), Error> {
        self.blocks.lock().unwrap().insert(block, buf.to_vec());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_write() {
        let disk = Memory::default();
        let block = BlockId::new(1, 7);

        // Unwritten blocks are zeroed
        let mut buf = [0xffu8; 16];
        disk.read(block, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
        assert_eq!(disk.reads(), 1);

        // Written blocks are returned
        disk.write(block, &[3u8; 16]).unwrap();
        assert_eq!(disk.writes(), 1);
        disk.read(block, &mut buf).unwrap();
        assert_eq!(buf, [3u8; 16]);
        assert_eq!(disk.reads(), 2);

        // Same number on another device is a different block
        disk.read(BlockId::new(2, 7), &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);

        // Peeking does not count
        assert_eq!(disk.get(block), Some(vec![3u8; 16]));
        assert_eq!(disk.reads(), 3);
    }

    #[test]
    fn test_memory_block_size_mismatch() {
        let disk = Memory::default();
        let block = BlockId::new(0, 0);
        disk.put(block, vec![1u8; 8]);

        let mut buf = [0u8; 16];
        let err = disk.read(block, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::BlockSizeMismatch {
                expected: 16,
                actual: 8
            }
        ));
        assert_eq!(disk.reads(), 0);
    }
}
