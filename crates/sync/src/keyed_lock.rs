//! Per-key async mutual exclusion.
//!
//! Serializes the read-detect-resolve-persist-refresh sequence for one
//! (child, activity) pair while leaving every other pair free to proceed.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

/// A map of lazily created async mutexes, one per key.
///
/// A key's slot lives only while some task holds or waits on it, so the map
/// does not grow with the number of keys ever locked.
pub struct KeyedLock<K> {
    slots: Slots<K>,
}

impl<K> Default for KeyedLock<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.clone()).or_default().clone()
        };
        // Built before the wait so a cancelled waiter still reclaims its
        // slot. The wait future, and its clone of the slot, drops first.
        let mut held = KeyedGuard {
            key,
            slots: self.slots.clone(),
            guard: None,
        };
        held.guard = Some(slot.lock_owned().await);
        held
    }

    /// Number of keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive access to one key. Dropping it releases the key and reclaims
/// the slot when nobody else is waiting.
pub struct KeyedGuard<K>
where
    K: Eq + Hash,
{
    key: K,
    slots: Slots<K>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyedGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // Release first so the strong count below only counts waiters.
        self.guard.take();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}
