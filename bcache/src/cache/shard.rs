use super::slot::Member;
use crate::BlockId;
use std::sync::{Mutex, MutexGuard};

/// Map a block number to the index of the shard responsible for it.
pub(super) fn hash(number: u32, shards: usize) -> usize {
    number as usize % shards
}

/// The order in which the shards other than `home` are searched for a buffer to steal.
pub(super) fn steal_order(home: usize, shards: usize) -> impl Iterator<Item = usize> {
    (1..shards).map(move |step| (home + step) % shards)
}

/// A lock-protected partition of the buffers.
#[derive(Default)]
pub(super) struct Shard {
    members: Mutex<Members>,
}

impl Shard {
    pub fn lock(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap()
    }
}

/// The buffers currently owned by a shard.
///
/// Order carries no meaning: insertion appends and removal swaps the last member into the hole.
#[derive(Default)]
pub(super) struct Members(Vec<Member>);

impl Members {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, member: Member) {
        self.0.push(member);
    }

    pub fn remove(&mut self, pos: usize) -> Member {
        self.0.swap_remove(pos)
    }

    pub fn get_mut(&mut self, pos: usize) -> &mut Member {
        &mut self.0[pos]
    }

    pub fn last_use(&self, pos: usize) -> u64 {
        self.0[pos].last_use
    }

    /// The member caching `block`, if any.
    pub fn find(&self, block: BlockId) -> Option<&Member> {
        self.0.iter().find(|m| m.block == Some(block))
    }

    fn find_mut(&mut self, block: BlockId) -> Option<&mut Member> {
        self.0.iter_mut().find(|m| m.block == Some(block))
    }

    /// Number of members caching `block`.
    #[cfg(test)]
    pub fn count(&self, block: BlockId) -> usize {
        self.0.iter().filter(|m| m.block == Some(block)).count()
    }

    /// The member describing `slot`, if this shard owns it.
    pub fn slot(&mut self, slot: usize) -> Option<&mut Member> {
        self.0.iter_mut().find(|m| m.slot == slot)
    }

    /// Take a reference to the member caching `block` and return its slot.
    pub fn hold(&mut self, block: BlockId) -> Option<usize> {
        let member = self.find_mut(block)?;
        member.refs += 1;
        Some(member.slot)
    }

    /// Position of the free member that was released the longest time ago.
    ///
    /// Ties go to the member encountered first.
    pub fn lru(&self) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (pos, member) in self.0.iter().enumerate() {
            if !member.is_free() {
                continue;
            }
            if best.map_or(true, |(_, last_use)| member.last_use < last_use) {
                best = Some((pos, member.last_use));
            }
        }
        best.map(|(pos, _)| pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(slot: usize, refs: u32, last_use: u64) -> Member {
        Member {
            slot,
            block: Some(BlockId::new(1, slot as u32)),
            refs,
            last_use,
        }
    }

    #[test]
    fn test_hash_and_steal_order() {
        assert_eq!(hash(0, 13), 0);
        assert_eq!(hash(14, 13), 1);
        assert_eq!(hash(u32::MAX, 1), 0);

        assert_eq!(steal_order(2, 4).collect::<Vec<_>>(), vec![3, 0, 1]);
        assert_eq!(steal_order(0, 1).count(), 0);
    }

    #[test]
    fn test_lru_skips_held_and_prefers_oldest() {
        let mut members = Members::default();
        assert_eq!(members.lru(), None);

        members.insert(member(0, 1, 0));
        assert_eq!(members.lru(), None);

        members.insert(member(1, 0, 7));
        members.insert(member(2, 0, 3));
        members.insert(member(3, 0, 3));
        members.insert(member(4, 2, 1));
        assert_eq!(members.lru(), Some(2));
        assert_eq!(members.last_use(2), 3);

        // Removing swaps the tail into the hole
        assert_eq!(members.remove(2).slot, 2);
        assert_eq!(members.len(), 4);
        assert_eq!(members.get_mut(2).slot, 4);
        assert_eq!(members.lru(), Some(3));
    }

    #[test]
    fn test_hold_and_slot_lookup() {
        let mut members = Members::default();
        members.insert(Member::new(9));
        members.insert(member(3, 0, 5));

        // Unused members carry no block
        assert!(members.find(BlockId::new(0, 0)).is_none());
        assert_eq!(members.count(BlockId::new(0, 0)), 0);
        assert_eq!(members.find(BlockId::new(1, 3)).unwrap().slot, 3);

        assert_eq!(members.hold(BlockId::new(1, 3)), Some(3));
        assert_eq!(members.slot(3).unwrap().refs, 1);
        assert_eq!(members.hold(BlockId::new(1, 4)), None);
        assert!(members.slot(4).is_none());
    }
}
