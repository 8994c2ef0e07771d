//! Configuration schema definitions.

use serde::{Deserialize, Serialize};

mod schema_jobs;
mod schema_web3;

pub use schema_jobs::*;
pub use schema_web3::*;

/// Shared default helper used by submodules.
pub(crate) fn default_true() -> bool {
    true
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub coordination: CoordinationConfig,

    #[serde(default)]
    pub leader: LeaderConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub web3: Web3Config,

    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
}

/// Node identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity written into leader keys and run identities.
    #[serde(default = "default_node_id")]
    pub id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
        }
    }
}

/// Resolve the node id: `CHAINKEEPER_NODE_ID`, then the host name, then a generated id.
pub fn default_node_id() -> String {
    ["CHAINKEEPER_NODE_ID", "HOSTNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("node-{}", &id[..8])
        })
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files. Supports `~`.
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,

    /// Number of daily files to keep.
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            file_prefix: default_log_prefix(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "~/.chainkeeper/logs".to_string()
}

fn default_log_prefix() -> String {
    "chainkeeper".to_string()
}

fn default_max_log_files() -> usize {
    30
}

/// Topology of the coordination store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    #[default]
    Single,
    Cluster,
}

/// Coordination store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Store URL. In cluster mode, a comma separated list of node URLs.
    #[serde(default = "default_store_url")]
    pub url: String,

    #[serde(default)]
    pub mode: StoreMode,

    /// Namespace prepended to every key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound for lock TTLs derived from job timeouts.
    #[serde(default = "default_lock_max_ttl")]
    pub lock_max_ttl_secs: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            mode: StoreMode::default(),
            key_prefix: default_key_prefix(),
            lock_max_ttl_secs: default_lock_max_ttl(),
        }
    }
}

impl CoordinationConfig {
    /// Split the configured URL into node URLs.
    pub fn urls(&self) -> Vec<String> {
        self.url
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from)
            .collect()
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "chainkeeper:".to_string()
}

fn default_lock_max_ttl() -> u64 {
    600
}

/// Leader election configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// TTL of the leader key; must exceed the heartbeat interval.
    #[serde(default = "default_leader_ttl")]
    pub ttl_secs: u64,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval(),
            ttl_secs: default_leader_ttl(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    5000
}

fn default_leader_ttl() -> u64 {
    10
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
