//! Ranked endpoint pools with per-endpoint health checks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ChainClient, ClientFactory};
use crate::error::Web3Error;
use crate::types::{EndpointConfig, EndpointKind, EndpointStatus};

/// One endpoint and its current client.
pub struct Endpoint {
    config: EndpointConfig,
    label: String,
    status: RwLock<EndpointStatus>,
    client: RwLock<Arc<dyn ChainClient>>,
    factory: Arc<dyn ClientFactory>,
}

impl Endpoint {
    /// Endpoints start online and are demoted by their first failed check.
    pub fn new(config: EndpointConfig, factory: Arc<dyn ClientFactory>) -> Result<Self, Web3Error> {
        let client = factory.create(&config)?;
        Ok(Self {
            label: config.label(),
            config,
            status: RwLock::new(EndpointStatus::Online),
            client: RwLock::new(client),
            factory,
        })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    pub fn kind(&self) -> EndpointKind {
        self.config.kind
    }

    pub fn status(&self) -> EndpointStatus {
        *self.status.read()
    }

    pub fn is_online(&self) -> bool {
        self.status() == EndpointStatus::Online
    }

    /// Current client. Replaced after every failed health check.
    pub fn client(&self) -> Arc<dyn ChainClient> {
        self.client.read().clone()
    }

    /// Probe the endpoint with a height query and record the result.
    pub async fn health_check(&self) -> EndpointStatus {
        let started = Instant::now();
        let client = self.client();
        match client.get_current_height().await {
            Ok(height) => {
                let previous = std::mem::replace(&mut *self.status.write(), EndpointStatus::Online);
                if previous == EndpointStatus::Offline {
                    info!("Endpoint {} is back online at height {}", self.label, height);
                } else {
                    debug!(
                        "Endpoint {} health check ok at height {} ({}ms)",
                        self.label,
                        height,
                        started.elapsed().as_millis()
                    );
                }
                EndpointStatus::Online
            }
            Err(e) => {
                self.connection_abnormal(&e);
                EndpointStatus::Offline
            }
        }
    }

    /// Like [`Endpoint::health_check`], but a probe still pending after
    /// `limit` counts as failed.
    pub async fn health_check_within(&self, limit: Duration) -> EndpointStatus {
        match tokio::time::timeout(limit, self.health_check()).await {
            Ok(status) => status,
            Err(_) => {
                self.connection_abnormal(&Web3Error::Timeout(format!(
                    "health check after {}ms",
                    limit.as_millis()
                )));
                EndpointStatus::Offline
            }
        }
    }

    /// Mark offline and swap in a fresh client for the next check.
    fn connection_abnormal(&self, err: &Web3Error) {
        warn!("Endpoint {} health check failed: {}", self.label, err);
        *self.status.write() = EndpointStatus::Offline;
        match self.factory.create(&self.config) {
            Ok(client) => *self.client.write() = client,
            Err(e) => error!("Failed to recreate client for {}: {}", self.label, e),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_status(&self, status: EndpointStatus) {
        *self.status.write() = status;
    }
}

/// Lower bound on a single health check when the interval is very short.
const MIN_CHECK_LIMIT: Duration = Duration::from_secs(1);

/// Endpoints grouped by network.
pub struct EndpointPool {
    endpoints: RwLock<HashMap<String, Vec<Arc<Endpoint>>>>,
    factory: Arc<dyn ClientFactory>,
    interval_ms: AtomicU64,
}

impl EndpointPool {
    pub fn new(
        configs: Vec<EndpointConfig>,
        factory: Arc<dyn ClientFactory>,
        health_check_interval_ms: u64,
    ) -> Result<Self, Web3Error> {
        let endpoints = Self::build(&configs, &factory)?;
        Ok(Self {
            endpoints: RwLock::new(endpoints),
            factory,
            interval_ms: AtomicU64::new(health_check_interval_ms),
        })
    }

    fn build(
        configs: &[EndpointConfig],
        factory: &Arc<dyn ClientFactory>,
    ) -> Result<HashMap<String, Vec<Arc<Endpoint>>>, Web3Error> {
        let mut endpoints: HashMap<String, Vec<Arc<Endpoint>>> = HashMap::new();
        for config in configs {
            let endpoint = Endpoint::new(config.clone(), factory.clone())?;
            endpoints
                .entry(config.network.clone())
                .or_default()
                .push(Arc::new(endpoint));
        }
        for (network, list) in &endpoints {
            info!("{}: {} endpoints initialized", network, list.len());
        }
        Ok(endpoints)
    }

    /// Best endpoint of `kind` for `network`: the highest-priority online
    /// one, or the highest-priority one when none is online. Never cached.
    pub fn get_endpoint(&self, network: &str, kind: EndpointKind) -> Option<Arc<Endpoint>> {
        let endpoints = self.endpoints.read();
        let mut candidates: Vec<&Arc<Endpoint>> = endpoints
            .get(network)?
            .iter()
            .filter(|e| e.kind() == kind)
            .collect();
        candidates.sort_by(|a, b| b.priority().cmp(&a.priority()));

        candidates
            .iter()
            .find(|e| e.is_online())
            .or_else(|| candidates.first())
            .map(|e| Arc::clone(e))
    }

    /// Client of the selected endpoint.
    pub fn client(&self, network: &str, kind: EndpointKind) -> Result<Arc<dyn ChainClient>, Web3Error> {
        self.get_endpoint(network, kind)
            .map(|e| e.client())
            .ok_or_else(|| Web3Error::NoEndpoint {
                network: network.to_string(),
                kind,
            })
    }

    pub fn endpoints(&self, network: &str) -> Vec<Arc<Endpoint>> {
        self.endpoints.read().get(network).cloned().unwrap_or_default()
    }

    pub fn networks(&self) -> Vec<String> {
        let mut networks: Vec<String> = self.endpoints.read().keys().cloned().collect();
        networks.sort();
        networks
    }

    /// Check every endpoint concurrently. A check that outlives the
    /// interval marks its endpoint offline.
    pub async fn health_check_all(&self) {
        let limit = Duration::from_millis(self.interval_ms.load(Ordering::SeqCst)).max(MIN_CHECK_LIMIT);
        let all: Vec<Arc<Endpoint>> = self.endpoints.read().values().flatten().cloned().collect();
        join_all(all.iter().map(|e| e.health_check_within(limit))).await;
    }

    /// Swap in a new endpoint list. Existing clients are dropped.
    pub fn replace_endpoints(&self, configs: Vec<EndpointConfig>) -> Result<(), Web3Error> {
        let endpoints = Self::build(&configs, &self.factory)?;
        *self.endpoints.write() = endpoints;
        info!("Endpoint pool reloaded with {} endpoints", configs.len());
        Ok(())
    }

    pub fn update_interval(&self, health_check_interval_ms: u64) {
        self.interval_ms.store(health_check_interval_ms, Ordering::SeqCst);
    }

    /// Check now, then on the configured interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Endpoint health check started (interval: {}ms)",
                self.interval_ms.load(Ordering::SeqCst)
            );
            self.health_check_all().await;
            loop {
                let interval = Duration::from_millis(self.interval_ms.load(Ordering::SeqCst));
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        self.health_check_all().await;
                    }
                    _ = cancel.cancelled() => {
                        info!("Endpoint health check shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
