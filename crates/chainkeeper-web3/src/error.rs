//! Web3 error types.

use thiserror::Error;

use crate::types::EndpointKind;

/// Errors raised by chain clients, the endpoint pool and the subscriber.
#[derive(Debug, Error)]
pub enum Web3Error {
    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket transport failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error: {message} (code: {code})")]
    Rpc { code: i64, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The connection closed before a response arrived.
    #[error("Connection closed")]
    Closed,

    /// Contract event name is neither `allEvents` nor a topic hash.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No {kind} endpoint configured for network {network}")]
    NoEndpoint { network: String, kind: EndpointKind },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Web3Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Web3Error::WebSocket(e.to_string())
    }
}

impl From<reqwest::Error> for Web3Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Web3Error::Timeout(e.to_string())
        } else {
            Web3Error::Http(e.to_string())
        }
    }
}

impl From<url::ParseError> for Web3Error {
    fn from(e: url::ParseError) -> Self {
        Web3Error::Http(format!("Invalid URL: {}", e))
    }
}
