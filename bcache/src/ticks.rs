use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// A shared, monotonically non-decreasing counter.
///
/// The [crate::Cache] only ever reads [Ticks]: it stamps a buffer with the current value when its
/// last holder lets go, and evicts the free buffer with the smallest stamp. Something outside the
/// cache (a timer thread, a scheduler, a test) is expected to advance it.
///
/// Clones share the same counter.
#[derive(Clone, Debug, Default)]
pub struct Ticks(Arc<AtomicU64>);

impl Ticks {
    /// Returns a new counter starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current value.
    pub fn now(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advance by one and return the new value.
    pub fn tick(&self) -> u64 {
        self.advance(1)
    }

    /// Advance by `n` and return the new value.
    pub fn advance(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::AcqRel) + n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_shared_between_clones() {
        let ticks = Ticks::new();
        let other = ticks.clone();
        assert_eq!(ticks.now(), 0);

        assert_eq!(other.tick(), 1);
        assert_eq!(ticks.now(), 1);

        assert_eq!(ticks.advance(10), 11);
        assert_eq!(other.now(), 11);
    }
}
