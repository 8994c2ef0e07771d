//! Chain client contract and client construction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Web3Error;
use crate::rpc::HttpRpcClient;
use crate::types::{ChainEvent, EndpointConfig, EndpointKind, SubscriptionMessage, SubscriptionTarget};
use crate::ws::WsRpcClient;

/// Receiving side of an open subscription.
///
/// The stream ends when the subscription is cleared or the client dropped.
pub struct SubscriptionHandle {
    id: String,
    receiver: mpsc::UnboundedReceiver<SubscriptionMessage>,
}

impl SubscriptionHandle {
    pub fn new(id: impl Into<String>, receiver: mpsc::UnboundedReceiver<SubscriptionMessage>) -> Self {
        Self {
            id: id.into(),
            receiver,
        }
    }

    /// Server-side subscription id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn recv(&mut self) -> Option<SubscriptionMessage> {
        self.receiver.recv().await
    }
}

/// Operations offered by one network endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block height. Also used as the liveness probe.
    async fn get_current_height(&self) -> Result<u64, Web3Error>;

    /// Raw JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value, Web3Error>;

    /// Gas estimate for a transaction object.
    async fn estimate_cost(&self, tx: Value) -> Result<u64, Web3Error>;

    /// Contract events in `[from, to]`.
    async fn get_events_in_range(
        &self,
        address: &str,
        event: &str,
        from: u64,
        to: u64,
        filter: Option<Value>,
    ) -> Result<Vec<ChainEvent>, Web3Error>;

    /// Open a streaming subscription. Only streaming endpoints support this.
    async fn subscribe(
        &self,
        target: &SubscriptionTarget,
        filter: Option<Value>,
    ) -> Result<SubscriptionHandle, Web3Error>;

    /// Tear down every subscription opened through this client.
    async fn clear_subscriptions(&self) -> Result<(), Web3Error>;
}

/// Builds a fresh client for an endpoint.
pub trait ClientFactory: Send + Sync {
    fn create(&self, config: &EndpointConfig) -> Result<Arc<dyn ChainClient>, Web3Error>;
}

/// Factory for the JSON-RPC clients: HTTP for `rpc`, WebSocket for `wss`.
#[derive(Debug, Clone)]
pub struct JsonRpcClientFactory {
    request_timeout: Duration,
}

impl JsonRpcClientFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl ClientFactory for JsonRpcClientFactory {
    fn create(&self, config: &EndpointConfig) -> Result<Arc<dyn ChainClient>, Web3Error> {
        match config.kind {
            EndpointKind::Rpc => Ok(Arc::new(HttpRpcClient::new(
                &config.url,
                self.request_timeout,
            )?)),
            EndpointKind::Wss => Ok(Arc::new(WsRpcClient::new(&config.url, self.request_timeout)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_bad_urls() {
        let factory = JsonRpcClientFactory::new(Duration::from_secs(5));
        let bad = EndpointConfig::new("ethereum", "::nope", EndpointKind::Wss, 1);
        assert!(factory.create(&bad).is_err());

        let good = EndpointConfig::new("ethereum", "ws://127.0.0.1:8546", EndpointKind::Wss, 1);
        assert!(factory.create(&good).is_ok());
    }

    #[tokio::test]
    async fn test_handle_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = SubscriptionHandle::new("0x1", rx);
        tx.send(SubscriptionMessage::Connected).unwrap();
        drop(tx);

        assert_eq!(handle.id(), "0x1");
        assert_eq!(handle.recv().await, Some(SubscriptionMessage::Connected));
        assert_eq!(handle.recv().await, None);
    }
}
