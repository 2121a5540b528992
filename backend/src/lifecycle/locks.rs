//! Per-reservation mutual exclusion

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per key, created on demand and dropped when unused.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

/// Held for the duration of a transition
pub struct KeyedGuard {
    key: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: KeyedLocks,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: Uuid) -> KeyedGuard {
        let mutex = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key,
            guard: Some(guard),
            locks: self.clone(),
        }
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self
            .locks
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Only the map holds the mutex once nobody waits on it.
        if slots
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let key = Uuid::new_v4();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(key).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(Uuid::new_v4())).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
