//! A fixed pool of block buffers, partitioned into independently locked shards.
//!
//! # Structure
//!
//! Every buffer is owned by exactly one shard. A shard owns the buffers whose block number hashes
//! to it (plus, before first use, whatever buffers it started with) and protects their identity,
//! reference count, and recency stamp with its own lock. A buffer's contents are protected
//! separately, by a per-buffer [crate::sleeplock::SleepLock] that the caller holds for as long as
//! it has the [Buf].
//!
//! # Lookup
//!
//! A request for a block first locks only the block's home shard. If the block is resident, its
//! reference count is incremented and the caller then waits for the buffer lock. Callers touching
//! blocks in different shards never contend.
//!
//! On a miss, the caller takes the global lock and then the home shard lock (always in that
//! order), and looks again: another caller may have brought the block in since the first look.
//! If it is still missing, the least recently released free buffer in the home shard is
//! recycled. If the home shard has no free buffer, every other shard is searched (starting just
//! past the home shard) for the free buffer with the oldest stamp, which is moved into the home
//! shard. If no buffer anywhere is free, the request fails with [crate::Error::NoBuffers].
//!
//! Only misses take the global lock, so only one caller at a time ever moves buffers between
//! shards.
//!
//! # Recency
//!
//! Buffers are not kept in recency order. Instead, when a release drops a buffer's reference count
//! to zero, the buffer is stamped with the current value of the shared [Ticks] counter, and
//! eviction picks the free buffer with the smallest stamp. Buffers that are pinned or held are
//! never considered.

use crate::{disk::Disk, metrics::Metrics, sleeplock::SleepLockGuard, BlockId, Error, Ticks};
use prometheus_client::registry::Registry;
use shard::{hash, steal_order, Members, Shard};
use slot::{Member, Slot};
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, error, trace};

mod shard;
mod slot;

/// Default number of shards.
pub const NBUCKET: usize = 13;

/// Default number of buffers.
pub const NBUF: usize = 30;

/// Default block size in bytes.
pub const BSIZE: usize = 1024;

/// Panic message shown when a [Buf] is used after its lock was given up.
const RELEASED: &str = "buffer already released";

/// Configuration for a [Cache].
#[derive(Clone, Debug)]
pub struct Config {
    /// The number of independently locked shards.
    pub shards: usize,

    /// The total number of buffers (the maximum number of blocks cached at once).
    pub buffers: usize,

    /// The size of each block in bytes.
    pub block_size: usize,

    /// Whether [Cache::unpin] stamps a buffer's recency when it drops the last reference (as a
    /// release does). When false, a buffer freed by an unpin keeps its previous stamp.
    pub stamp_on_unpin: bool,

    /// The counter read to stamp released buffers.
    pub ticks: Ticks,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shards: NBUCKET,
            buffers: NBUF,
            block_size: BSIZE,
            stamp_on_unpin: false,
            ticks: Ticks::default(),
        }
    }
}

/// A concurrently shared cache of disk blocks.
pub struct Cache<D: Disk> {
    disk: D,
    ticks: Ticks,
    block_size: usize,
    stamp_on_unpin: bool,

    /// Serializes misses (and therefore all movement of buffers between shards).
    global: Mutex<()>,
    shards: Vec<Shard>,
    slots: Vec<Slot>,

    metrics: Metrics,
}

impl<D: Disk> Cache<D> {
    /// Create a cache of `cfg.buffers` zeroed buffers in front of `disk`.
    ///
    /// # Panics
    ///
    /// Panics if `cfg.shards`, `cfg.buffers`, or `cfg.block_size` is 0.
    pub fn new(cfg: Config, disk: D) -> Self {
        assert!(cfg.shards > 0, "shards must be positive");
        assert!(cfg.buffers > 0, "buffers must be positive");
        assert!(cfg.block_size > 0, "block size must be positive");

        let slots = (0..cfg.buffers)
            .map(|_| Slot::new(cfg.block_size))
            .collect();
        let shards: Vec<Shard> = (0..cfg.shards).map(|_| Shard::default()).collect();
        {
            // Unused buffers start out in the first shard and migrate on demand.
            let mut members = shards[0].lock();
            for slot in 0..cfg.buffers {
                members.insert(Member::new(slot));
            }
            debug!(
                shards = cfg.shards,
                buffers = members.len(),
                block_size = cfg.block_size,
                "initialized cache"
            );
        }

        Self {
            disk,
            ticks: cfg.ticks,
            block_size: cfg.block_size,
            stamp_on_unpin: cfg.stamp_on_unpin,
            global: Mutex::new(()),
            shards,
            slots,
            metrics: Metrics::default(),
        }
    }

    /// Register the cache's metrics with `registry`.
    pub fn register(&self, registry: &mut Registry) {
        self.metrics.register(registry);
    }

    /// The device behind the cache.
    pub fn disk(&self) -> &D {
        &self.disk
    }

    /// The counter used to stamp released buffers.
    pub fn ticks(&self) -> &Ticks {
        &self.ticks
    }

    /// The size of each buffer in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether some buffer currently carries `block` (whether or not its contents are valid).
    pub fn contains(&self, block: BlockId) -> bool {
        self.shard(block).find(block).is_some()
    }

    /// Return a locked buffer assigned to `block`, without reading it from disk.
    ///
    /// If the block was not resident, the returned buffer's contents are stale and
    /// [Buf::is_valid] is false.
    ///
    /// Blocks until the buffer lock can be acquired. Fails with [Error::NoBuffers] if the block is
    /// not resident and every buffer is held or pinned.
    pub fn acquire(&self, block: BlockId) -> Result<Buf<'_, D>, Error> {
        // Is the block already cached? (The shard lock must be gone before waiting on the buffer.)
        let hit = self.shard(block).hold(block);
        if let Some(slot) = hit {
            self.metrics.hits.inc();
            trace!(%block, slot, "hit");
            return Ok(self.enter(block, slot));
        }

        // Not cached. Serialize with other misses and look again, since another caller may have
        // brought the block in while we held no lock.
        let global = self.global.lock().unwrap();
        let home = self.home(block);
        let mut members = self.shards[home].lock();
        if let Some(slot) = members.hold(block) {
            drop(members);
            drop(global);
            self.metrics.late_hits.inc();
            trace!(%block, slot, "late hit");
            return Ok(self.enter(block, slot));
        }

        // Recycle the least recently used free buffer of the home shard.
        if let Some(pos) = members.lru() {
            let slot = self.assign(members.get_mut(pos), block);
            drop(members);
            drop(global);
            self.metrics.recycled.inc();
            debug!(%block, slot, "recycled buffer");
            return Ok(self.enter(block, slot));
        }

        // Steal the least recently used free buffer of any other shard. Only the lock of the shard
        // holding the best candidate so far is kept.
        let mut best: Option<(usize, MutexGuard<'_, Members>, usize)> = None;
        for donor in steal_order(home, self.shards.len()) {
            let candidates = self.shards[donor].lock();
            let Some(pos) = candidates.lru() else {
                continue;
            };
            let better = match &best {
                Some((_, current, current_pos)) => {
                    candidates.last_use(pos) < current.last_use(*current_pos)
                }
                None => true,
            };
            if better {
                best = Some((donor, candidates, pos));
            }
        }
        let Some((donor, mut candidates, pos)) = best else {
            drop(members);
            drop(global);
            self.metrics.exhausted.inc();
            error!(%block, "no buffers");
            return Err(Error::NoBuffers);
        };
        let mut member = candidates.remove(pos);
        drop(candidates);
        let slot = self.assign(&mut member, block);
        members.insert(member);
        drop(members);
        drop(global);
        self.metrics.stolen.inc();
        debug!(%block, slot, donor, "stole buffer");
        Ok(self.enter(block, slot))
    }

    /// Return a locked buffer with the contents of `block`.
    ///
    /// Reads from disk only if the buffer's contents are not already valid. If the read fails,
    /// the buffer is released and remains invalid.
    pub fn read(&self, block: BlockId) -> Result<Buf<'_, D>, Error> {
        let mut buf = self.acquire(block)?;
        if !buf.is_valid() {
            self.disk.read(block, &mut buf[..])?;
            self.slots[buf.slot].set_valid(true);
            self.metrics.reads.inc();
            debug!(%block, slot = buf.slot, "read block");
        }
        Ok(buf)
    }

    /// Write the contents of `buf` to disk.
    ///
    /// # Panics
    ///
    /// Panics if `buf` was not issued by this cache or its lock is not held by the caller.
    pub fn write(&self, buf: &Buf<'_, D>) -> Result<(), Error> {
        assert!(std::ptr::eq(buf.cache, self), "write: buffer from another cache");
        assert!(buf.guard().holding(), "write: buffer not locked");
        self.disk.write(buf.block, buf)?;
        self.metrics.writes.inc();
        debug!(block = %buf.block, slot = buf.slot, "wrote block");
        Ok(())
    }

    /// Release a locked buffer. Equivalent to dropping it.
    ///
    /// The buffer lock is given up first. If this was the last reference, the buffer becomes
    /// eligible for recycling and is stamped with the current tick.
    ///
    /// # Panics
    ///
    /// Panics if `buf` was not issued by this cache or its lock is not held by the caller.
    pub fn release(&self, buf: Buf<'_, D>) {
        assert!(std::ptr::eq(buf.cache, self), "release: buffer from another cache");
        drop(buf);
    }

    /// Keep `buf`'s block resident until the returned [Pinned] is unpinned (or dropped), even
    /// after `buf` itself is released.
    ///
    /// # Panics
    ///
    /// Panics if `buf` was not issued by this cache.
    pub fn pin<'a>(&'a self, buf: &Buf<'a, D>) -> Pinned<'a, D> {
        assert!(std::ptr::eq(buf.cache, self), "pin: buffer from another cache");
        let mut members = self.shard(buf.block);
        let member = members.slot(buf.slot).expect("pin: buffer missing from its shard");
        member.refs += 1;
        Pinned {
            cache: self,
            block: buf.block,
            slot: buf.slot,
        }
    }

    /// Drop the reference taken by [Cache::pin]. Equivalent to dropping `pin`.
    ///
    /// Unless [Config::stamp_on_unpin] is set, a buffer freed this way keeps the stamp of its
    /// last release.
    ///
    /// # Panics
    ///
    /// Panics if `pin` was not issued by this cache.
    pub fn unpin(&self, pin: Pinned<'_, D>) {
        assert!(std::ptr::eq(pin.cache, self), "unpin: pin from another cache");
        drop(pin);
    }

    fn home(&self, block: BlockId) -> usize {
        hash(block.number, self.shards.len())
    }

    fn shard(&self, block: BlockId) -> MutexGuard<'_, Members> {
        self.shards[self.home(block)].lock()
    }

    /// Give a free member a new identity and a single reference.
    fn assign(&self, member: &mut Member, block: BlockId) -> usize {
        assert!(member.is_free(), "assign: buffer in use");
        member.block = Some(block);
        member.refs = 1;
        self.slots[member.slot].set_valid(false);
        member.slot
    }

    /// Wait for the buffer lock of a slot we hold a reference to.
    fn enter(&self, block: BlockId, slot: usize) -> Buf<'_, D> {
        let data = self.slots[slot].data.lock();
        Buf {
            cache: self,
            block,
            slot,
            data: Some(data),
        }
    }

    /// Drop a reference to `slot`, stamping it if `stamp` and no references remain.
    fn unref(&self, block: BlockId, slot: usize, stamp: bool) {
        let mut members = self.shard(block);
        let member = members
            .slot(slot)
            .expect("unref: buffer missing from its shard");
        assert!(member.refs > 0, "unref: buffer not referenced");
        member.refs -= 1;
        if member.refs == 0 && stamp {
            member.last_use = self.ticks.now();
            trace!(%block, slot, last_use = member.last_use, "freed buffer");
        }
    }
}

/// A locked buffer holding one block.
///
/// Dereferences to the block contents. Dropping it releases the buffer (see [Cache::release]).
pub struct Buf<'a, D: Disk> {
    cache: &'a Cache<D>,
    block: BlockId,
    slot: usize,
    data: Option<SleepLockGuard<'a, Box<[u8]>>>,
}

impl<D: Disk> Buf<'_, D> {
    /// The block this buffer holds.
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// The index of the buffer within the cache. Stable for the lifetime of the cache.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Whether the contents reflect what was read from disk.
    pub fn is_valid(&self) -> bool {
        self.cache.slots[self.slot].is_valid()
    }

    fn guard(&self) -> &SleepLockGuard<'_, Box<[u8]>> {
        self.data.as_ref().expect(RELEASED)
    }
}

impl<D: Disk> Deref for Buf<'_, D> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard()[..]
    }
}

impl<D: Disk> DerefMut for Buf<'_, D> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data.as_mut().expect(RELEASED)[..]
    }
}

impl<D: Disk> Drop for Buf<'_, D> {
    fn drop(&mut self) {
        let data = self.data.take().expect(RELEASED);
        assert!(data.holding(), "release: buffer not locked");
        drop(data);
        self.cache.unref(self.block, self.slot, true);
    }
}

impl<D: Disk> fmt::Debug for Buf<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("block", &self.block)
            .field("slot", &self.slot)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A reference that keeps a block resident. Dropping it unpins the block (see [Cache::unpin]).
///
/// Unlike a [Buf], a [Pinned] grants no access to the contents and may be sent across threads.
#[must_use = "dropping a Pinned unpins the block immediately"]
pub struct Pinned<'a, D: Disk> {
    cache: &'a Cache<D>,
    block: BlockId,
    slot: usize,
}

impl<D: Disk> Pinned<'_, D> {
    /// The pinned block.
    pub fn block(&self) -> BlockId {
        self.block
    }
}

impl<D: Disk> Drop for Pinned<'_, D> {
    fn drop(&mut self) {
        self.cache
            .unref(self.block, self.slot, self.cache.stamp_on_unpin);
    }
}

impl<D: Disk> fmt::Debug for Pinned<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinned")
            .field("block", &self.block)
            .field("slot", &self.slot)
            .finish()
    }
}
