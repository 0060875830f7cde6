//! Serializes work per key.
//!
//! Every worker pool acquires the key it reconciles through the same [`KeyedLock`], so work for a
//! key never runs concurrently no matter which queue produced it.

use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::{hash::Hash, sync::Arc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct KeyedLock<K> {
    locks: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

/// Held while a key is exclusively owned. Dropping it releases the key.
///
/// A guard also exists, without a lock, while its `acquire` waits, so that a cancelled waiter still
/// prunes the key.
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard<K: Eq + Hash> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

// === impl KeyedLock ===

impl<K> Clone for KeyedLock<K> {
    fn clone(&self) -> Self {
        Self {
            locks: self.locks.clone(),
        }
    }
}

impl<K> Default for KeyedLock<K> {
    fn default() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::default())),
        }
    }
}

impl<K: Clone + Eq + Hash> KeyedLock<K> {
    /// Waits until no other holder owns `key`. Waiters are served in order.
    pub async fn acquire(&self, key: &K) -> KeyGuard<K> {
        let mut held = KeyGuard {
            key: key.clone(),
            guard: None,
            locks: self.locks.clone(),
        };
        // The lock's reference lives in this scope so that it is dropped before `held` on
        // cancellation.
        let guard = {
            let lock = self.locks.lock().entry(key.clone()).or_default().clone();
            lock.lock_owned().await
        };
        held.guard = Some(guard);
        held
    }

    /// The number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// === impl KeyGuard ===

impl<K: Eq + Hash> KeyGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        drop(self.guard.take());
        // Only the map's reference remains, so nobody holds or waits on this key.
        let idle = locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.key);
        }
    }
}
