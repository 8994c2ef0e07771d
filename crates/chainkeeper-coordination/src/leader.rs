//! Advisory leader election over the coordination store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::keys::KeySpace;
use crate::store::CoordinationStore;

/// Leadership as last observed by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    /// No successful heartbeat yet, or the store could not be read.
    Unknown,
    Master,
    Follower,
}

/// Heartbeat-driven leader election.
///
/// State only changes as the outcome of [`LeaderElection::heartbeat`].
pub struct LeaderElection {
    store: Arc<dyn CoordinationStore>,
    node_id: String,
    ttl_secs: AtomicU64,
    interval_ms: AtomicU64,
    state: RwLock<LeaderState>,
}

impl LeaderElection {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        node_id: impl Into<String>,
        interval_ms: u64,
        ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            node_id: node_id.into(),
            ttl_secs: AtomicU64::new(ttl_secs),
            interval_ms: AtomicU64::new(interval_ms),
            state: RwLock::new(LeaderState::Unknown),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn state(&self) -> LeaderState {
        *self.state.read()
    }

    pub fn is_master(&self) -> bool {
        self.state() == LeaderState::Master
    }

    /// Apply new timings; takes effect on the next heartbeat.
    pub fn update_timings(&self, interval_ms: u64, ttl_secs: u64) {
        self.interval_ms.store(interval_ms, Ordering::SeqCst);
        self.ttl_secs.store(ttl_secs, Ordering::SeqCst);
    }

    /// Evaluate leadership once.
    pub async fn heartbeat(&self) -> LeaderState {
        let ttl = self.ttl_secs.load(Ordering::SeqCst);
        let next = match self.store.get(KeySpace::LEADER).await {
            Ok(None) => {
                match self
                    .store
                    .set_if_absent(KeySpace::LEADER, &self.node_id, ttl)
                    .await
                {
                    Ok(true) => LeaderState::Master,
                    Ok(false) => LeaderState::Follower,
                    Err(e) => {
                        warn!("Leader claim by {} failed: {}", self.node_id, e);
                        LeaderState::Unknown
                    }
                }
            }
            Ok(Some(current)) if current == self.node_id => {
                match self.store.refresh_ttl(KeySpace::LEADER, ttl).await {
                    Ok(true) => LeaderState::Master,
                    Ok(false) => {
                        debug!("Leader key expired before refresh by {}", self.node_id);
                        LeaderState::Follower
                    }
                    Err(e) => {
                        warn!("Leader refresh by {} failed: {}", self.node_id, e);
                        LeaderState::Unknown
                    }
                }
            }
            Ok(Some(_)) => LeaderState::Follower,
            Err(e) => {
                warn!("Leader heartbeat for {} failed: {}", self.node_id, e);
                LeaderState::Unknown
            }
        };

        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            info!("Node {} leader state {:?} -> {:?}", self.node_id, prev, next);
        }
        next
    }

    /// Run heartbeats until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Leader election started for node {}", self.node_id);
            loop {
                self.heartbeat().await;
                let interval = Duration::from_millis(self.interval_ms.load(Ordering::SeqCst));
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => {
                        info!("Leader election for node {} shutting down", self.node_id);
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "leader_tests.rs"]
mod tests;
