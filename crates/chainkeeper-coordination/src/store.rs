//! Coordination store contract.

use async_trait::async_trait;

use crate::error::StoreError;

/// Shared key-value store used for locks, leader keys and job runtime state.
///
/// Every node of a deployment talks to the same store; it is the only
/// cross-node mutable resource.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, optionally with a TTL in seconds.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), StoreError>;

    /// Atomically write the value only if the key is absent. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64)
    -> Result<bool, StoreError>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Extend the TTL of an existing key. Returns false when the key is absent.
    async fn refresh_ttl(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError>;
}
