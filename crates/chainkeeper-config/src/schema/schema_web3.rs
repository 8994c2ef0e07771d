//! Endpoint pool and event subscription configuration types.

use serde::{Deserialize, Serialize};

/// Endpoint pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Web3Config {
    /// Per-endpoint liveness probe period.
    #[serde(default = "default_endpoint_health_interval")]
    pub health_check_interval_ms: u64,

    /// Timeout for a single JSON-RPC request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub endpoints: Vec<EndpointEntry>,
}

impl Default for Web3Config {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_endpoint_health_interval(),
            request_timeout_ms: default_request_timeout(),
            endpoints: Vec::new(),
        }
    }
}

fn default_endpoint_health_interval() -> u64 {
    10_000
}

fn default_request_timeout() -> u64 {
    30_000
}

/// Endpoint transport as written in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKindConfig {
    Rpc,
    Wss,
}

/// A configured network endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointEntry {
    /// Network identifier, e.g. `ethereum` or `bsc`.
    pub network: String,
    pub url: String,
    pub kind: EndpointKindConfig,
    /// Higher is preferred.
    #[serde(default)]
    pub priority: i32,
}

/// Event subscription manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionsConfig {
    #[serde(default = "default_subscription_health_interval")]
    pub health_check_interval_ms: u64,

    /// A health check older than this no longer blocks a new one.
    #[serde(default = "default_max_check_wait")]
    pub max_check_wait_ms: u64,

    /// Number of blocks scanned below the confirmed head.
    #[serde(default = "default_window_blocks")]
    pub window_blocks: u64,

    /// Blocks below the chain head treated as unconfirmed.
    #[serde(default = "default_confirmation_lag")]
    pub confirmation_lag: u64,

    /// Networks checked in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delay before resubscribing after a subscription error.
    #[serde(default = "default_resubscribe_delay")]
    pub resubscribe_delay_ms: u64,

    /// Silence threshold for subscriptions that do not set their own.
    #[serde(default = "default_subscription_timeout")]
    pub default_timeout_ms: u64,

    /// Contract subscriptions opened at startup.
    #[serde(default)]
    pub contracts: Vec<ContractSubscriptionConfig>,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_subscription_health_interval(),
            max_check_wait_ms: default_max_check_wait(),
            window_blocks: default_window_blocks(),
            confirmation_lag: default_confirmation_lag(),
            concurrency: default_concurrency(),
            resubscribe_delay_ms: default_resubscribe_delay(),
            default_timeout_ms: default_subscription_timeout(),
            contracts: Vec::new(),
        }
    }
}

fn default_subscription_health_interval() -> u64 {
    30_000
}

fn default_max_check_wait() -> u64 {
    60_000
}

fn default_window_blocks() -> u64 {
    10
}

fn default_confirmation_lag() -> u64 {
    3
}

fn default_concurrency() -> usize {
    2
}

fn default_resubscribe_delay() -> u64 {
    1000
}

fn default_subscription_timeout() -> u64 {
    600_000
}

/// A contract event subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSubscriptionConfig {
    pub network: String,
    pub address: String,
    /// `allEvents` or a 0x-prefixed topic hash.
    #[serde(default = "default_event")]
    pub event: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_event() -> String {
    "allEvents".to_string()
}
