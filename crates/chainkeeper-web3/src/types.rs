//! Endpoint and event types shared by the pool, clients and subscriber.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jsonrpc::parse_quantity;

/// Transport kind of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Request-response over HTTP.
    Rpc,
    /// Streaming over WebSocket.
    Wss,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Rpc => write!(f, "rpc"),
            EndpointKind::Wss => write!(f, "wss"),
        }
    }
}

/// Liveness of an endpoint as of its last health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    Online,
    Offline,
}

/// One configured network address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub network: String,
    pub url: String,
    pub kind: EndpointKind,
    /// Higher is preferred.
    pub priority: i32,
}

impl EndpointConfig {
    pub fn new(
        network: impl Into<String>,
        url: impl Into<String>,
        kind: EndpointKind,
        priority: i32,
    ) -> Self {
        Self {
            network: network.into(),
            url: url.into(),
            kind,
            priority,
        }
    }

    /// Log label `{network}-{kind}-{priority}-{host}`. The URL path is left
    /// out since providers put API keys there.
    pub fn label(&self) -> String {
        let host = url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| self.url.clone());
        format!("{}-{}-{}-{}", self.network, self.kind, self.priority, host)
    }
}

/// An event delivered by a subscription or returned by a range query.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEvent {
    pub block_number: Option<u64>,
    /// Set when a reorg removed a previously delivered log.
    pub removed: bool,
    pub raw: Value,
}

impl ChainEvent {
    /// Wrap a log or block header payload.
    pub fn from_value(raw: Value) -> Self {
        let block_number = raw
            .get("blockNumber")
            .or_else(|| raw.get("number"))
            .and_then(|v| parse_quantity(v).ok());
        let removed = raw.get("removed").and_then(Value::as_bool).unwrap_or(false);
        Self {
            block_number,
            removed,
            raw,
        }
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    /// Logs emitted by one contract. `event` is `allEvents` or a topic hash.
    Contract { address: String, event: String },
    /// A raw chain stream such as `newHeads` or `logs`, named by the caller.
    Chain { event: String, name: String },
}

impl SubscriptionTarget {
    /// Stable id used to reject duplicate subscriptions.
    pub fn id(&self) -> String {
        match self {
            SubscriptionTarget::Contract { address, event } => format!("{}-{}", address, event),
            SubscriptionTarget::Chain { event, name } => format!("{}-{}", event, name),
        }
    }

    pub fn is_contract(&self) -> bool {
        matches!(self, SubscriptionTarget::Contract { .. })
    }
}

/// Messages emitted by a subscription handle.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    Connected,
    Data(ChainEvent),
    /// A previously delivered event was changed or removed by a reorg.
    Changed(ChainEvent),
    Error(String),
}
