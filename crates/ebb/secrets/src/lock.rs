//! Per-secret rotation locks

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One mutex per secret name: same-secret rotations serialize, others don't
#[derive(Default)]
pub struct SecretLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SecretLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so no map shard stays locked across the await.
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Whether a rotation of `name` currently holds the lock
    pub fn is_held(&self, name: &str) -> bool {
        self.locks
            .get(name)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_same_name_serializes() {
        let locks = Arc::new(SecretLocks::new());
        let guard = locks.acquire("db-password").await;
        assert!(locks.is_held("db-password"));

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("db-password").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_held("db-password"));
    }

    #[tokio::test]
    async fn test_different_names_do_not_block() {
        let locks = SecretLocks::new();
        let _a = locks.acquire("db-password").await;
        let _b = locks.acquire("auth-client-id").await;
        assert!(locks.is_held("db-password"));
        assert!(locks.is_held("auth-client-id"));
    }
}
