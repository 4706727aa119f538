use crate::{sleeplock::SleepLock, BlockId};
use std::sync::atomic::{AtomicBool, Ordering};

/// Storage for one cached block.
///
/// A [Slot] never moves and is never freed. What changes is the [Member] describing it, which
/// belongs to exactly one shard at a time.
pub(super) struct Slot {
    /// Whether `data` holds the on-disk contents of the slot's current block.
    ///
    /// Cleared under the owning shard's lock when the slot is given a new identity (nobody can
    /// hold `data` then), and set by the holder of `data` after a read completes.
    valid: AtomicBool,

    /// The block contents.
    pub data: SleepLock<Box<[u8]>>,
}

impl Slot {
    pub fn new(block_size: usize) -> Self {
        Self {
            valid: AtomicBool::new(false),
            data: SleepLock::new(vec![0; block_size].into_boxed_slice()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }
}

/// The bookkeeping a shard keeps for each [Slot] it owns.
#[derive(Clone, Copy, Debug)]
pub(super) struct Member {
    /// Index of the described [Slot].
    pub slot: usize,

    /// The block the slot currently caches (`None` until first used).
    pub block: Option<BlockId>,

    /// Number of holders and pins. Zero means the slot may be recycled.
    pub refs: u32,

    /// The tick at which `refs` last dropped to zero on release.
    pub last_use: u64,
}

impl Member {
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            block: None,
            refs: 0,
            last_use: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.refs == 0
    }
}
