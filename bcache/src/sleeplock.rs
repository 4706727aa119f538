//! A blocking lock that knows who holds it.
//!
//! [SleepLock] guards the payload of a single buffer. Waiters block (rather than spin) because a
//! holder may keep the lock across disk I/O. Unlike a bare [Mutex], it can answer whether the
//! calling thread is the one currently holding it, which is how the cache checks that
//! [crate::Cache::write] and [crate::Cache::release] are only called by a buffer's owner.

use std::{
    ops::{Deref, DerefMut},
    sync::{Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
};

/// A blocking mutual-exclusion lock over `T` that records its holder.
#[derive(Debug, Default)]
pub struct SleepLock<T> {
    holder: Mutex<Option<ThreadId>>,
    inner: Mutex<T>,
}

impl<T> SleepLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            holder: Mutex::new(None),
            inner: Mutex::new(value),
        }
    }

    /// Block until the lock is acquired.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        // Payloads are plain bytes, so a holder that panicked leaves nothing to repair.
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.enter(guard)
    }

    /// Acquire the lock if nobody holds it.
    #[cfg(test)]
    fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        use std::sync::TryLockError;

        let guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(self.enter(guard))
    }

    /// Whether the calling thread holds the lock.
    pub fn holding(&self) -> bool {
        *self.holder() == Some(thread::current().id())
    }

    fn enter<'a>(&'a self, guard: MutexGuard<'a, T>) -> SleepLockGuard<'a, T> {
        *self.holder() = Some(thread::current().id());
        SleepLockGuard { lock: self, guard }
    }

    fn holder(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of holding a [SleepLock]. Releases the lock when dropped.
///
/// Like [MutexGuard], it cannot be sent to another thread.
pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
    guard: MutexGuard<'a, T>,
}

impl<T> SleepLockGuard<'_, T> {
    /// Whether the calling thread holds the underlying lock.
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        // Clear the holder while the inner lock is still held.
        *self.lock.holder() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::mpsc, time::Duration};

    #[test]
    fn test_holding_tracks_current_thread() {
        let lock = SleepLock::new(0u32);
        assert!(!lock.holding());

        let guard = lock.lock();
        assert!(guard.holding());
        assert!(lock.holding());

        // Another thread sees the lock as held, but not by itself.
        thread::scope(|s| {
            s.spawn(|| {
                assert!(!lock.holding());
                assert!(lock.try_lock().is_none());
            });
        });

        drop(guard);
        assert!(!lock.holding());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_waiter_blocks_until_release() {
        let lock = SleepLock::new(Vec::new());
        let (tx, rx) = mpsc::channel();

        let mut guard = lock.lock();
        thread::scope(|s| {
            s.spawn(|| {
                let mut guard = lock.lock();
                guard.push(2);
                tx.send(()).unwrap();
            });

            // The waiter cannot get in while we hold the lock.
            assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
            guard.push(1);
            drop(guard);
            rx.recv().unwrap();
        });

        assert_eq!(*lock.lock(), vec![1, 2]);
    }

    #[test]
    fn test_lock_survives_panicking_holder() {
        let lock = SleepLock::new(7u8);
        let result = thread::scope(|s| {
            s.spawn(|| {
                let _guard = lock.lock();
                panic!("holder failed");
            })
            .join()
        });
        assert!(result.is_err());

        let guard = lock.lock();
        assert_eq!(*guard, 7);
        assert!(guard.holding());
    }
}
