//! JSON-RPC message types and Ethereum encoding helpers.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Web3Error;
use crate::types::ChainEvent;

/// Event name meaning "every log of the contract".
pub const ALL_EVENTS: &str = "allEvents";

/// JSON-RPC request message.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// Incoming message: a response when `id` is set, a notification otherwise.
#[derive(Debug, Deserialize)]
pub struct JsonRpcMessage {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcErrorObject>,
    pub method: Option<String>,
    pub params: Option<Value>,
}

/// Error object in a response.
#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl JsonRpcMessage {
    pub fn into_result(self) -> Result<Value, Web3Error> {
        match self.error {
            Some(error) => Err(Web3Error::Rpc {
                code: error.code,
                message: error.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Decode a hex quantity (`"0x1b4"`) or a plain JSON number.
pub fn parse_quantity(value: &Value) -> Result<u64, Web3Error> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    let text = value
        .as_str()
        .ok_or_else(|| Web3Error::InvalidResponse(format!("expected quantity, got {}", value)))?;
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| Web3Error::InvalidResponse(format!("quantity without 0x prefix: {}", text)))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| Web3Error::InvalidResponse(format!("bad quantity {}: {}", text, e)))
}

pub fn quantity(n: u64) -> Value {
    Value::String(format!("0x{:x}", n))
}

/// Topic filter for a contract event name: `None` for `allEvents`,
/// otherwise the 32-byte topic hash.
pub fn event_topic(event: &str) -> Result<Option<String>, Web3Error> {
    if event == ALL_EVENTS {
        return Ok(None);
    }
    let valid = event.len() == 66
        && event.starts_with("0x")
        && event[2..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(Some(event.to_ascii_lowercase()))
    } else {
        Err(Web3Error::InvalidEvent(event.to_string()))
    }
}

/// Build an `eth_getLogs` / `eth_subscribe("logs")` filter.
///
/// Extra `topics` from the caller's filter are appended after the event
/// topic so they match indexed event arguments.
pub fn log_filter(
    address: &str,
    event: &str,
    range: Option<(u64, u64)>,
    extra: Option<&Value>,
) -> Result<Value, Web3Error> {
    let mut topics = vec![event_topic(event)?.map(Value::String).unwrap_or(Value::Null)];
    if let Some(extra_topics) = extra
        .and_then(|f| f.get("topics"))
        .and_then(Value::as_array)
    {
        topics.extend(extra_topics.iter().cloned());
    }
    while topics.last() == Some(&Value::Null) {
        topics.pop();
    }

    let mut filter = json!({ "address": address });
    if !topics.is_empty() {
        filter["topics"] = Value::Array(topics);
    }
    if let Some((from, to)) = range {
        filter["fromBlock"] = quantity(from);
        filter["toBlock"] = quantity(to);
    }
    Ok(filter)
}

/// Decode an `eth_getLogs` result.
pub fn parse_logs(value: Value) -> Result<Vec<ChainEvent>, Web3Error> {
    match value {
        Value::Array(logs) => Ok(logs.into_iter().map(ChainEvent::from_value).collect()),
        other => Err(Web3Error::InvalidResponse(format!(
            "expected log array, got {}",
            other
        ))),
    }
}
