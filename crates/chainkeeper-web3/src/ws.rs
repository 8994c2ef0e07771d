//! JSON-RPC over WebSocket with `eth_subscribe` support.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};

use crate::client::{ChainClient, SubscriptionHandle};
use crate::error::Web3Error;
use crate::jsonrpc::{JsonRpcMessage, JsonRpcRequest, log_filter, parse_logs, parse_quantity};
use crate::types::{ChainEvent, SubscriptionMessage, SubscriptionTarget};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;
type SubscriptionMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SubscriptionMessage>>>>;

/// Pending request waiting for response.
struct PendingRequest {
    tx: oneshot::Sender<Result<Value, Web3Error>>,
    /// Set for `eth_subscribe`: registered under the returned id before
    /// the response is released.
    subscription: Option<mpsc::UnboundedSender<SubscriptionMessage>>,
}

struct Connection {
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    recv_task: JoinHandle<()>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        !self.recv_task.is_finished()
    }
}

/// Client for a `wss` endpoint.
///
/// Connects on first use and reconnects on the next request after the
/// socket closes. When the socket closes every pending request fails with
/// [`Web3Error::Closed`] and every open subscription receives
/// [`SubscriptionMessage::Error`].
pub struct WsRpcClient {
    url: url::Url,
    request_timeout: Duration,
    request_id: AtomicU64,
    pending: PendingMap,
    /// Open subscriptions by server-side id.
    subscriptions: SubscriptionMap,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl WsRpcClient {
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, Web3Error> {
        let url = url::Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Web3Error::WebSocket(format!(
                "unsupported scheme {} for {}",
                url.scheme(),
                url.host_str().unwrap_or_default()
            )));
        }
        Ok(Self {
            url,
            request_timeout,
            request_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            connection: tokio::sync::Mutex::new(None),
        })
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(Connection::is_alive)
    }

    /// Sink of the live connection, connecting first if needed.
    async fn sink(&self) -> Result<Arc<tokio::sync::Mutex<WsSink>>, Web3Error> {
        let mut connection = self.connection.lock().await;
        if let Some(conn) = connection.as_ref().filter(|c| c.is_alive()) {
            return Ok(conn.sink.clone());
        }

        let host = self.url.host_str().unwrap_or_default();
        let connect = tokio_tungstenite::connect_async(self.url.as_str());
        let (ws_stream, _) = tokio::time::timeout(self.request_timeout, connect)
            .await
            .map_err(|_| {
                Web3Error::Timeout(format!(
                    "connect to {} after {}ms",
                    host,
                    self.request_timeout.as_millis()
                ))
            })?
            .map_err(|e| Web3Error::WebSocket(format!("connect to {}: {}", host, e)))?;

        let (ws_sink, ws_source) = ws_stream.split();
        let sink = Arc::new(tokio::sync::Mutex::new(ws_sink));

        let recv_task = {
            let pending = self.pending.clone();
            let subscriptions = self.subscriptions.clone();
            tokio::spawn(async move {
                Self::receive_loop(ws_source, pending, subscriptions).await;
            })
        };

        debug!("WebSocket connected to {}", host);
        *connection = Some(Connection {
            sink: sink.clone(),
            recv_task,
        });
        Ok(sink)
    }

    /// WebSocket receive loop.
    async fn receive_loop(mut ws_source: WsSource, pending: PendingMap, subscriptions: SubscriptionMap) {
        while let Some(msg) = ws_source.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    trace!("WS recv: {}", text);
                    match serde_json::from_str::<JsonRpcMessage>(&text) {
                        Ok(message) => Self::dispatch(message, &pending, &subscriptions),
                        Err(e) => warn!("Failed to parse JSON-RPC message: {}", e),
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("WebSocket closed");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        let failed: Vec<_> = pending.lock().drain().collect();
        for (_, request) in failed {
            let _ = request.tx.send(Err(Web3Error::Closed));
        }
        let orphaned: Vec<_> = subscriptions.lock().drain().collect();
        for (id, tx) in orphaned {
            let _ = tx.send(SubscriptionMessage::Error(format!(
                "connection closed under subscription {}",
                id
            )));
        }
    }

    fn dispatch(message: JsonRpcMessage, pending: &PendingMap, subscriptions: &SubscriptionMap) {
        if let Some(id) = message.id {
            let pending_req = pending.lock().remove(&id);
            if let Some(req) = pending_req {
                let result = message.into_result();
                // Notifications may follow the ack in the same burst.
                let registered = match (req.subscription, &result) {
                    (Some(events), Ok(Value::String(sub_id))) => {
                        let _ = events.send(SubscriptionMessage::Connected);
                        subscriptions.lock().insert(sub_id.clone(), events);
                        Some(sub_id.clone())
                    }
                    _ => None,
                };
                if req.tx.send(result).is_err() {
                    if let Some(sub_id) = registered {
                        subscriptions.lock().remove(&sub_id);
                    }
                }
            }
            return;
        }

        if message.method.as_deref() != Some("eth_subscription") {
            return;
        }
        let Some(params) = message.params else {
            return;
        };
        let Some(subscription) = params.get("subscription").and_then(Value::as_str) else {
            return;
        };

        let event = ChainEvent::from_value(params.get("result").cloned().unwrap_or(Value::Null));
        let message = if event.removed {
            SubscriptionMessage::Changed(event)
        } else {
            SubscriptionMessage::Data(event)
        };
        match subscriptions.lock().get(subscription) {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!("Notification for unknown subscription {}", subscription),
        }
    }

    /// Send a request and wait for its response.
    async fn request(&self, method: &str, params: Value) -> Result<Value, Web3Error> {
        self.send_request(method, params, None).await
    }

    async fn send_request(
        &self,
        method: &str,
        params: Value,
        subscription: Option<mpsc::UnboundedSender<SubscriptionMessage>>,
    ) -> Result<Value, Web3Error> {
        let sink = self.sink().await?;
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        trace!("WS send: {}", json);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, PendingRequest { tx, subscription });

        {
            let mut ws = sink.lock().await;
            if let Err(e) = ws.send(Message::Text(json.into())).await {
                self.pending.lock().remove(&id);
                return Err(e.into());
            }
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Web3Error::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Web3Error::Timeout(format!(
                    "{} after {}ms",
                    method,
                    self.request_timeout.as_millis()
                )))
            }
        }
    }
}

impl Drop for WsRpcClient {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut().take() {
            conn.recv_task.abort();
        }
    }
}

#[async_trait]
impl ChainClient for WsRpcClient {
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
        let result = self.request("eth_getLogs", json!([filter])).await?;
        parse_logs(result)
    }

    async fn subscribe(
        &self,
        target: &SubscriptionTarget,
        filter: Option<Value>,
    ) -> Result<SubscriptionHandle, Web3Error> {
        let params = match target {
            SubscriptionTarget::Contract { address, event } => {
                json!(["logs", log_filter(address, event, None, filter.as_ref())?])
            }
            SubscriptionTarget::Chain { event, .. } => match filter {
                Some(filter) => json!([event, filter]),
                None => json!([event]),
            },
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let result = self.send_request("eth_subscribe", params, Some(tx)).await?;
        let id = result
            .as_str()
            .ok_or_else(|| Web3Error::InvalidResponse(format!("subscription id {}", result)))?
            .to_string();

        debug!("Subscribed {} as {}", target.id(), id);
        Ok(SubscriptionHandle::new(id, rx))
    }

    async fn clear_subscriptions(&self) -> Result<(), Web3Error> {
        let ids: Vec<String> = self.subscriptions.lock().drain().map(|(id, _)| id).collect();
        if ids.is_empty() || !self.is_connected().await {
            return Ok(());
        }
        for id in ids {
            if let Err(e) = self.request("eth_unsubscribe", json!([id])).await {
                debug!("Failed to unsubscribe {}: {}", id, e);
            }
        }
        Ok(())
    }
}
