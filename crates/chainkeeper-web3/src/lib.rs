//! # Chainkeeper Web3
//!
//! Ranked endpoint pools per blockchain network, JSON-RPC clients over HTTP
//! and WebSocket, and an event subscriber that detects stalled streams and
//! resubscribes on a fresh endpoint.

pub mod client;
pub mod error;
pub mod jsonrpc;
pub mod pool;
pub mod rpc;
pub mod subscriber;
pub mod types;
pub mod ws;

pub use client::{ChainClient, ClientFactory, JsonRpcClientFactory, SubscriptionHandle};
pub use error::Web3Error;
pub use pool::{Endpoint, EndpointPool};
pub use rpc::HttpRpcClient;
pub use subscriber::{EventCallback, EventSubscriber, SubscriberSettings};
pub use types::{
    ChainEvent, EndpointConfig, EndpointKind, EndpointStatus, SubscriptionMessage,
    SubscriptionTarget,
};
pub use ws::WsRpcClient;
