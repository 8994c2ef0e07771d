//! Store-backed job runtime state.

use std::sync::Arc;

use chainkeeper_coordination::{CoordinationStore, KeySpace};

use crate::error::SchedulerError;
use crate::job::JobRuntimeState;

/// Reads and writes `JobRuntimeState` as JSON under `cron:{code}`.
#[derive(Clone)]
pub struct JobStateStore {
    store: Arc<dyn CoordinationStore>,
}

impl JobStateStore {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Load the state of a job. A missing entry is a fresh INIT state.
    pub async fn load(&self, code: &str) -> Result<JobRuntimeState, SchedulerError> {
        match self.store.get(&KeySpace::job_state(code)).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| SchedulerError::InvalidState {
                code: code.to_string(),
                source,
            }),
            None => Ok(JobRuntimeState::default()),
        }
    }

    pub async fn save(&self, code: &str, state: &JobRuntimeState) -> Result<(), SchedulerError> {
        let raw = serde_json::to_string(state).map_err(|source| SchedulerError::InvalidState {
            code: code.to_string(),
            source,
        })?;
        self.store.set(&KeySpace::job_state(code), &raw, None).await?;
        Ok(())
    }
}
