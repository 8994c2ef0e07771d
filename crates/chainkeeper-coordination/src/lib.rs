//! # Chainkeeper Coordination
//!
//! Shared key-value store contract plus the primitives built on it:
//! a TTL-backed distributed lock and an advisory leader election.

pub mod error;
pub mod keys;
pub mod leader;
pub mod lock;
pub mod memory_store;
pub mod redis_store;
pub mod store;

pub use error::{LockError, StoreError};
pub use keys::KeySpace;
pub use leader::{LeaderElection, LeaderState};
pub use lock::{DistributedLock, clamp_ttl_secs};
pub use memory_store::MemoryStore;
pub use redis_store::{RedisStore, RedisTopology};
pub use store::CoordinationStore;
