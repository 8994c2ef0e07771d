//! JSON-RPC over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::trace;

use crate::client::{ChainClient, SubscriptionHandle};
use crate::error::Web3Error;
use crate::jsonrpc::{JsonRpcMessage, JsonRpcRequest, log_filter, parse_logs, parse_quantity, quantity};
use crate::types::{ChainEvent, SubscriptionTarget};

/// Request-response client for an `rpc` endpoint.
pub struct HttpRpcClient {
    url: url::Url,
    http: reqwest::Client,
    request_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, Web3Error> {
        let url = url::Url::parse(url)?;
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            url,
            http,
            request_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, Web3Error> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        trace!("RPC send {}: {}", id, method);

        let response = self
            .http
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Web3Error::Http(format!("{} returned {}", method, status)));
        }

        let message: JsonRpcMessage = response.json().await?;
        message.into_result()
    }
}

#[async_trait]
impl ChainClient for HttpRpcClient {
    async fn get_current_height(&self) -> Result<u64, Web3Error> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, Web3Error> {
        self.request(method, params).await
    }

    async fn estimate_cost(&self, tx: Value) -> Result<u64, Web3Error> {
        let result = self.request("eth_estimateGas", json!([tx])).await?;
        parse_quantity(&result)
    }

    async fn get_events_in_range(
        &self,
        address: &str,
        event: &str,
        from: u64,
        to: u64,
        filter: Option<Value>,
    ) -> Result<Vec<ChainEvent>, Web3Error> {
        let filter = log_filter(address, event, Some((from, to)), filter.as_ref())?;
        trace!(
            "RPC getLogs {} {} [{} .. {}]",
            address,
            event,
            quantity(from),
            quantity(to)
        );
        let result = self.request("eth_getLogs", json!([filter])).await?;
        parse_logs(result)
    }

    async fn subscribe(
        &self,
        target: &SubscriptionTarget,
        _filter: Option<Value>,
    ) -> Result<SubscriptionHandle, Web3Error> {
        Err(Web3Error::Unsupported(format!(
            "subscribe {} over HTTP",
            target.id()
        )))
    }

    async fn clear_subscriptions(&self) -> Result<(), Web3Error> {
        Ok(())
    }
}
