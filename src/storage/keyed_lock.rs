//! Per-key mutual exclusion.

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::hash::Hash;
use std::sync::Arc;

/// Hands out one mutex per key, dropping idle entries on release.
///
/// Guards are synchronous; callers must not hold one across an `.await`.
pub(crate) struct KeyedLocks<K: Eq + Hash + Clone> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Blocks until the lock for `key` is held.
    pub(crate) fn lock(&self, key: &K) -> KeyGuard<'_, K> {
        let mutex = self.locks.entry(key.clone()).or_default().value().clone();
        KeyGuard {
            key: key.clone(),
            locks: &self.locks,
            guard: Some(mutex.lock_arc()),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

pub(crate) struct KeyGuard<'a, K: Eq + Hash + Clone> {
    key: K,
    locks: &'a DashMap<K, Arc<Mutex<()>>>,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still holds the mutex: nobody waits on this key.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn releases_idle_entries() {
        let locks = KeyedLocks::new();
        {
            let _a = locks.lock(&"a".to_string());
            let _b = locks.lock(&"b".to_string());
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn serializes_same_key() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = locks.lock(&"blob".to_string());
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
