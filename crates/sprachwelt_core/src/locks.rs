//! crates/sprachwelt_core/src/locks.rs
//!
//! A keyed mutex table. Mutations of one conversation state (or one user's stats) are
//! serialized behind the lock for its key; different keys never contend.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Entries whose lock is no longer held are swept once the table grows past this.
const SWEEP_THRESHOLD: usize = 1024;

pub struct KeyedLocks<K> {
    table: Mutex<HashMap<K, Weak<AsyncMutex<()>>>>,
}

/// Holding this guard grants exclusive access to the key it was acquired for.
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self { table: Mutex::new(HashMap::new()) }
    }

    /// Waits until no other task holds the lock for `key`.
    pub async fn acquire(&self, key: K) -> KeyGuard {
        let lock = self.lock_for(&key);
        let guard = lock.lock_owned().await;
        KeyGuard { _guard: guard }
    }

    fn lock_for(&self, key: &K) -> Arc<AsyncMutex<()>> {
        // A poisoned table only means another thread panicked between two map
        // operations; the map itself is still consistent.
        let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = table.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        if table.len() >= SWEEP_THRESHOLD {
            table.retain(|_, weak| weak.strong_count() > 0);
        }
        let fresh = Arc::new(AsyncMutex::new(()));
        table.insert(key.clone(), Arc::downgrade(&fresh));
        fresh
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_waits_for_the_holder() {
        let locks = Arc::new(KeyedLocks::<u32>::new());
        let first = locks.acquire(7).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(7).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = KeyedLocks::<u32>::new();
        let _a = locks.acquire(1).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(2)).await;
        assert!(b.is_ok());
    }
}
