//! Per-key async mutexes.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// One async mutex per key, created on first use and dropped once nobody
/// holds or waits for it.
///
/// Operations on different keys never contend. Multi-key callers must go
/// through [`KeyedLocks::lock_many`], which takes keys in ascending order.
pub struct KeyedLocks<K: Copy + Eq + Hash> {
    slots: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Copy + Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Copy + Eq + Hash> KeyedLocks<K> {
    fn slot(&self, key: K) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(slots.entry(key).or_default())
    }

    /// Remove the slot for `key` if the map holds its only reference.
    fn release(&self, key: K) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        if slots.get(&key).is_some_and(|m| Arc::strong_count(m) == 1) {
            slots.remove(&key);
        }
    }
}

impl<K: Copy + Eq + Hash + Ord> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let guard = self.slot(key).lock_owned().await;
        KeyGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    /// Lock every distinct key, lowest first.
    pub async fn lock_many(&self, keys: impl IntoIterator<Item = K>) -> Vec<KeyGuard<'_, K>> {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Keys with a live slot.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds the lock for one key; its slot is pruned on drop when unused.
pub struct KeyGuard<'a, K: Copy + Eq + Hash> {
    locks: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Copy + Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        // Unlock first so the guard's own reference is gone before the count.
        drop(self.guard.take());
        self.locks.release(self.key);
    }
}
