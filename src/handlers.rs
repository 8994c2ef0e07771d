//! Built-in job bodies.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use chainkeeper_scheduler::{HandlerRegistry, JobContext, JobError, JobHandler};
use chainkeeper_web3::{EndpointKind, EndpointPool};

pub(crate) const LOG_HANDLER: &str = "log";
pub(crate) const CHAIN_HEIGHT_HANDLER: &str = "chain_height";

/// Handler names accepted in job definitions.
pub(crate) const BUILTIN_HANDLERS: &[&str] = &[CHAIN_HEIGHT_HANDLER, LOG_HANDLER];

/// Logs its parameters and the run context.
pub(crate) struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    async fn run(&self, params: &[Value], ctx: JobContext) -> Result<(), JobError> {
        info!(
            "Log job fired at {} (timeout {}ms) with params {}",
            ctx.start_time_ms,
            ctx.timeout_ms,
            serde_json::Value::Array(params.to_vec())
        );
        Ok(())
    }
}

/// Reads the current height of the network named by the first parameter.
pub(crate) struct ChainHeightHandler {
    pool: Arc<EndpointPool>,
}

impl ChainHeightHandler {
    pub(crate) fn new(pool: Arc<EndpointPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobHandler for ChainHeightHandler {
    async fn run(&self, params: &[Value], _ctx: JobContext) -> Result<(), JobError> {
        let network = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| JobError::InvalidParams("expected a network name".to_string()))?;

        let endpoint = self
            .pool
            .get_endpoint(network, EndpointKind::Rpc)
            .ok_or_else(|| JobError::Failed(format!("no rpc endpoint for {}", network)))?;
        let height = endpoint
            .client()
            .get_current_height()
            .await
            .map_err(|e| JobError::Failed(e.to_string()))?;

        info!("{} height is {} (via {})", network, height, endpoint.label());
        Ok(())
    }
}

/// Registry holding every built-in handler.
pub(crate) fn builtin_handlers(pool: Arc<EndpointPool>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(LOG_HANDLER, Arc::new(LogHandler));
    registry.register(CHAIN_HEIGHT_HANDLER, Arc::new(ChainHeightHandler::new(pool)));
    registry
}
