//! KeyedLocks - Per-key mutual exclusion registry
//!
//! Trade execution must never interleave two mutations of the same account,
//! whether they originate from overlapping calls or a call plus a direct API
//! request. Rather than relying on incidental single-threaded execution, an
//! explicit registry hands out one async mutex per key; different keys never
//! contend. The same abstraction serializes webhook application per provider
//! call id.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for `key`, creating it on first use. The guard is
    /// owned, so it can be held across await points.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_same_key_excludes() {
        let locks = KeyedLocks::new();
        let _guard = locks.acquire("user-1").await;

        // A second acquisition of the same key must block
        let second = timeout(Duration::from_millis(50), locks.acquire("user-1")).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _guard = locks.acquire("user-1").await;

        let other = timeout(Duration::from_millis(50), locks.acquire("user-2")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_released_lock_can_be_reacquired() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.acquire("user-1").await;
        }
        let again = timeout(Duration::from_millis(50), locks.acquire("user-1")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_serializes_concurrent_tasks() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("user-1").await;
                let current = *counter.lock().await;
                tokio::time::sleep(Duration::from_millis(1)).await;
                *counter.lock().await = current + 1;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Without per-key exclusion the read-sleep-write pattern loses updates
        assert_eq!(*counter.lock().await, 10);
    }
}
