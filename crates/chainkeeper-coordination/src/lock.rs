//! TTL-backed distributed lock.
//!
//! The store entry is the only source of truth. The local acquisition time is
//! just a cache of "I took it", used to avoid deleting a lock that has
//! already expired and may now belong to someone else.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::LockError;
use crate::keys::KeySpace;
use crate::store::CoordinationStore;

/// Lock TTL for a body with the given timeout: `min(ceil(timeout / 1000), max)`, at least 1s.
pub fn clamp_ttl_secs(timeout_ms: u64, max_secs: u64) -> u64 {
    timeout_ms.div_ceil(1000).min(max_secs).max(1)
}

/// A named mutual-exclusion lease.
pub struct DistributedLock {
    store: Arc<dyn CoordinationStore>,
    key: String,
    holder: String,
    ttl_secs: u64,
    acquired_at: Mutex<Option<Instant>>,
}

impl DistributedLock {
    /// Create a lock on `lock:{kind}:{id}`.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        kind: &str,
        id: &str,
        ttl_secs: u64,
    ) -> Result<Self, LockError> {
        if kind.trim().is_empty() {
            return Err(LockError::InvalidLock("lock kind is empty".to_string()));
        }
        if id.trim().is_empty() {
            return Err(LockError::InvalidLock("lock id is empty".to_string()));
        }
        if ttl_secs == 0 {
            return Err(LockError::InvalidLock("lock ttl must be positive".to_string()));
        }

        Ok(Self {
            store,
            key: KeySpace::lock(kind, id),
            holder: Uuid::new_v4().to_string(),
            ttl_secs,
            acquired_at: Mutex::new(None),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Whether this instance believes it holds the lock.
    pub fn is_locked(&self) -> bool {
        self.acquired_at.lock().is_some()
    }

    /// Whether the local lease has run past its TTL.
    pub fn is_expired(&self) -> bool {
        match *self.acquired_at.lock() {
            Some(at) => at.elapsed() >= Duration::from_secs(self.ttl_secs),
            None => false,
        }
    }

    /// Try to take the lock once.
    ///
    /// Returns `LockError::Unavailable` when another holder owns it.
    pub async fn try_lock(&self) -> Result<bool, LockError> {
        let acquired = self
            .store
            .set_if_absent(&self.key, &self.holder, self.ttl_secs)
            .await?;
        if !acquired {
            return Err(LockError::Unavailable(self.key.clone()));
        }

        *self.acquired_at.lock() = Some(Instant::now());
        debug!("Lock {} acquired for {}s", self.key, self.ttl_secs);
        Ok(true)
    }

    /// Release the lock if it is still ours.
    ///
    /// A lock that was never taken or has expired locally is left alone.
    pub async fn unlock(&self) -> Result<(), LockError> {
        if !self.is_locked() {
            debug!("Lock {} not held, skipping unlock", self.key);
            return Ok(());
        }
        if self.is_expired() {
            warn!("Lock {} expired before unlock, leaving it to the TTL", self.key);
            *self.acquired_at.lock() = None;
            return Ok(());
        }

        *self.acquired_at.lock() = None;
        self.store.delete(&self.key).await?;
        debug!("Lock {} released", self.key);
        Ok(())
    }

    /// Run `body` while holding the lock. Release is always attempted and its
    /// failures are only logged.
    pub async fn mutex<F, Fut, T, E>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        self.try_lock().await?;
        let result = body().await;
        if let Err(e) = self.unlock().await {
            error!("Failed to release lock {}: {}", self.key, e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    fn store() -> Arc<dyn CoordinationStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn test_clamp_ttl() {
        assert_eq!(clamp_ttl_secs(1500, 600), 2);
        assert_eq!(clamp_ttl_secs(60_000, 600), 60);
        assert_eq!(clamp_ttl_secs(3_600_000, 600), 600);
        assert_eq!(clamp_ttl_secs(0, 600), 1);
    }

    #[test]
    fn test_invalid_lock() {
        assert!(matches!(
            DistributedLock::new(store(), "", "id", 5),
            Err(LockError::InvalidLock(_))
        ));
        assert!(matches!(
            DistributedLock::new(store(), "kind", " ", 5),
            Err(LockError::InvalidLock(_))
        ));
        assert!(matches!(
            DistributedLock::new(store(), "kind", "id", 0),
            Err(LockError::InvalidLock(_))
        ));
    }

    #[tokio::test]
    async fn test_contention() {
        let shared = store();
        let a = DistributedLock::new(shared.clone(), "cron", "sync", 5).unwrap();
        let b = DistributedLock::new(shared.clone(), "cron", "sync", 5).unwrap();

        assert!(a.try_lock().await.unwrap());
        assert!(matches!(b.try_lock().await, Err(LockError::Unavailable(_))));

        a.unlock().await.unwrap();
        assert!(b.try_lock().await.unwrap());
    }

    #[tokio::test]
    async fn test_unlock_without_lock_is_noop() {
        let shared = store();
        let a = DistributedLock::new(shared.clone(), "cron", "sync", 5).unwrap();
        let b = DistributedLock::new(shared.clone(), "cron", "sync", 5).unwrap();

        a.try_lock().await.unwrap();
        b.unlock().await.unwrap();
        assert!(shared.get("lock:cron:sync").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_not_released() {
        let shared = store();
        let a = DistributedLock::new(shared.clone(), "cron", "sync", 2).unwrap();
        let b = DistributedLock::new(shared.clone(), "cron", "sync", 2).unwrap();

        a.try_lock().await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(a.is_expired());

        // b takes over after expiry; a must not delete b's lock.
        assert!(b.try_lock().await.unwrap());
        a.unlock().await.unwrap();
        assert!(shared.get("lock:cron:sync").await.unwrap().is_some());
        assert!(!a.is_locked());
    }

    #[tokio::test]
    async fn test_mutex_releases_after_error() {
        let shared = store();
        let lock = DistributedLock::new(shared.clone(), "cron", "sync", 5).unwrap();

        let result: Result<(), LockError> = lock
            .mutex(|| async { Err(LockError::InvalidLock("body failed".to_string())) })
            .await;
        assert!(result.is_err());
        assert!(shared.get("lock:cron:sync").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mutex_contention_returns_unavailable() {
        let shared = store();
        let a = DistributedLock::new(shared.clone(), "cron", "sync", 5).unwrap();
        let b = DistributedLock::new(shared.clone(), "cron", "sync", 5).unwrap();
        a.try_lock().await.unwrap();

        let result: Result<u32, LockError> = b.mutex(|| async { Ok(1) }).await;
        assert!(matches!(result, Err(LockError::Unavailable(_))));
    }
}
