//! Keyed async mutual exclusion
//!
//! Matching and cancellation on one event run one at a time in this
//! process; different events proceed in parallel. Entries are dropped from
//! the map once nobody holds or waits on them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use common::{EventId, UserId};

type Slots<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

pub struct KeyedGuards<K: Eq + Hash + Clone> {
    slots: Slots<K>,
}

/// Per-event serialization shared by the engine and the coordinator
pub type EventGuards = KeyedGuards<EventId>;

/// Per-user serialization for the daily stakes cap check
pub type UserGuards = KeyedGuards<UserId>;

impl<K: Eq + Hash + Clone> KeyedGuards<K> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait until `key` is free and hold it until the guard drops
    pub async fn acquire(&self, key: &K) -> KeyGuard<K> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        KeyGuard {
            key: key.clone(),
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedGuards<K> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct KeyGuard<K: Eq + Hash + Clone> {
    key: K,
    slots: Slots<K>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone + fmt::Debug> fmt::Debug for KeyGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish_non_exhaustive()
    }
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.slots.lock();
        // The map's own reference is the last one: no holder, no waiter.
        if slots.get(&self.key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_same_key_waits_for_release() {
        let guards = EventGuards::new();
        let event = EventId::new("game-1");

        let held = guards.acquire(&event).await;
        let mut waiter = task::spawn(guards.acquire(&event));
        assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        let second = assert_ready!(waiter.poll());
        drop(second);
        drop(waiter);

        assert_eq!(guards.active(), 0);
    }

    #[tokio::test]
    async fn test_guard_debug_names_its_key() {
        let guards = EventGuards::new();
        let event = EventId::new("game-7");
        let held = guards.acquire(&event).await;
        assert!(format!("{:?}", held).contains("game-7"));
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let guards = EventGuards::new();
        let first = EventId::new("game-1");
        let second = EventId::new("game-2");
        let _a = guards.acquire(&first).await;
        let mut other = task::spawn(guards.acquire(&second));
        let _b = assert_ready!(other.poll());
        assert_eq!(guards.active(), 2);
    }
}
