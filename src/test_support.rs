//! Chain client fakes shared by the binary's tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use chainkeeper_web3::{
    ChainClient, ChainEvent, ClientFactory, EndpointConfig, SubscriptionHandle,
    SubscriptionTarget, Web3Error,
};

/// Reports a fixed height and no events. Streaming is unsupported.
pub(crate) struct FixedHeight(pub u64);

#[async_trait]
impl ChainClient for FixedHeight {
    async fn get_current_height(&self) -> Result<u64, Web3Error> {
        Ok(self.0)
    }

    async fn call(&self, method: &str, _params: Value) -> Result<Value, Web3Error> {
        Err(Web3Error::Unsupported(method.to_string()))
    }

    async fn estimate_cost(&self, _tx: Value) -> Result<u64, Web3Error> {
        Ok(21_000)
    }

    async fn get_events_in_range(
        &self,
        _address: &str,
        _event: &str,
        _from: u64,
        _to: u64,
        _filter: Option<Value>,
    ) -> Result<Vec<ChainEvent>, Web3Error> {
        Ok(Vec::new())
    }

    async fn subscribe(
        &self,
        _target: &SubscriptionTarget,
        _filter: Option<Value>,
    ) -> Result<SubscriptionHandle, Web3Error> {
        Err(Web3Error::Unsupported("subscribe".to_string()))
    }

    async fn clear_subscriptions(&self) -> Result<(), Web3Error> {
        Ok(())
    }
}

pub(crate) struct FixedFactory(pub u64);

impl ClientFactory for FixedFactory {
    fn create(&self, _config: &EndpointConfig) -> Result<Arc<dyn ChainClient>, Web3Error> {
        Ok(Arc::new(FixedHeight(self.0)))
    }
}
