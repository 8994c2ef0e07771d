//! Lock-guarded job run state transitions.
//!
//! The lock only protects the INIT/ENDED -> RUNNING write; job bodies run
//! outside it. Cross-node safety comes from re-reading state inside the lock
//! and from the run-identity check in [`RunCoordinator::end`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chainkeeper_coordination::{
    CoordinationStore, DistributedLock, KeySpace, LockError, clamp_ttl_secs,
};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::job::{JobDefinition, JobRuntimeState, RunAttempt, RunStatus};
use crate::state::JobStateStore;

/// Result of a start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// This node owns the run.
    Started(RunAttempt),
    /// The definition is disabled.
    Disabled,
    /// Another attempt is RUNNING and has not timed out.
    AlreadyRunning,
    /// Another node already ran this tick.
    AlreadyRan,
    /// Another node is transitioning the job right now.
    LockBusy,
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

/// Applies run state transitions for every job on this node.
pub struct RunCoordinator {
    store: Arc<dyn CoordinationStore>,
    states: JobStateStore,
    clock: Arc<dyn Clock>,
    node_id: String,
    lock_max_ttl_secs: AtomicU64,
}

impl RunCoordinator {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
        node_id: impl Into<String>,
        lock_max_ttl_secs: u64,
    ) -> Self {
        Self {
            states: JobStateStore::new(store.clone()),
            store,
            clock,
            node_id: node_id.into(),
            lock_max_ttl_secs: AtomicU64::new(lock_max_ttl_secs),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn states(&self) -> &JobStateStore {
        &self.states
    }

    pub fn set_lock_max_ttl_secs(&self, secs: u64) {
        self.lock_max_ttl_secs.store(secs, Ordering::SeqCst);
    }

    /// Try to move a job to RUNNING on behalf of this node.
    pub async fn try_start(&self, def: &JobDefinition) -> Result<StartOutcome, SchedulerError> {
        if !def.enabled {
            debug!("Job {} is disabled", def.code);
            return Ok(StartOutcome::Disabled);
        }

        let now = self.clock.now_ms();
        let state = self.states.load(&def.code).await?;
        if let Some(outcome) = self.precheck(def, &state, now) {
            return Ok(outcome);
        }

        let ttl = clamp_ttl_secs(
            def.timeout_ms,
            self.lock_max_ttl_secs.load(Ordering::SeqCst),
        );
        let lock = DistributedLock::new(self.store.clone(), KeySpace::JOB_LOCK_KIND, &def.code, ttl)?;
        let attempt = RunAttempt::new(def, &self.node_id, now);
        let attempt_ref = &attempt;

        let result: Result<StartOutcome, SchedulerError> = lock
            .mutex(move || async move {
                let attempt = attempt_ref;
                // Another node may have won between the first read and the lock.
                let state = self.states.load(&def.code).await?;
                if let Some(outcome) = self.precheck(def, &state, self.clock.now_ms()) {
                    return Ok(outcome);
                }
                let running = JobRuntimeState {
                    last_start_ms: attempt.start_time_ms,
                    status: RunStatus::Running,
                    run_id: Some(attempt.run_id.clone()),
                    ..state
                };
                self.states.save(&def.code, &running).await?;
                Ok(StartOutcome::Started(attempt.clone()))
            })
            .await;

        match result {
            Err(SchedulerError::Lock(LockError::Unavailable(key))) => {
                warn!("Job {} not started, failed to get lock {}", def.code, key);
                Ok(StartOutcome::LockBusy)
            }
            other => other,
        }
    }

    fn precheck(
        &self,
        def: &JobDefinition,
        state: &JobRuntimeState,
        now: i64,
    ) -> Option<StartOutcome> {
        match state.status {
            RunStatus::Ended if state.next_time_ms.is_some_and(|next| next > now) => {
                info!("Job {} already executed by another node", def.code);
                Some(StartOutcome::AlreadyRan)
            }
            RunStatus::Running if !state.is_timed_out(now, def.timeout_ms) => {
                warn!(
                    "Job {} is already executing as {}",
                    def.code,
                    state.run_id.as_deref().unwrap_or("unknown")
                );
                Some(StartOutcome::AlreadyRunning)
            }
            RunStatus::Running => {
                warn!(
                    "Job {} run {} timed out, taking over",
                    def.code,
                    state.run_id.as_deref().unwrap_or("unknown")
                );
                None
            }
            _ => None,
        }
    }

    /// Record completion of `attempt`.
    ///
    /// Returns false without writing when the stored state no longer belongs
    /// to this attempt.
    pub async fn end(
        &self,
        attempt: &RunAttempt,
        next_time_ms: Option<i64>,
    ) -> Result<bool, SchedulerError> {
        let state = self.states.load(&attempt.code).await?;
        if state.status != RunStatus::Running
            || state.run_id.as_deref() != Some(attempt.run_id.as_str())
        {
            error!(
                "Job {} run {} superseded, stored status {:?} run {:?}",
                attempt.code, attempt.run_id, state.status, state.run_id
            );
            return Ok(false);
        }

        let now = self.clock.now_ms();
        let ended = JobRuntimeState {
            status: RunStatus::Ended,
            execution_time_ms: now - attempt.start_time_ms,
            next_time_ms,
            ..state
        };
        self.states.save(&attempt.code, &ended).await?;
        debug!(
            "Job {} run {} ended after {}ms, next at {:?}",
            attempt.code, attempt.run_id, ended.execution_time_ms, next_time_ms
        );
        Ok(true)
    }

    /// Force a job back to INIT and clear its lock.
    pub async fn reset_state(
        &self,
        def: &JobDefinition,
        next_time_ms: Option<i64>,
    ) -> Result<(), SchedulerError> {
        self.store.delete(&KeySpace::job_lock(&def.code)).await?;
        let state = self.states.load(&def.code).await.unwrap_or_else(|e| {
            warn!("Job {} has unreadable state, rewriting it: {}", def.code, e);
            JobRuntimeState::default()
        });
        let reset = JobRuntimeState {
            status: RunStatus::Init,
            next_time_ms,
            run_id: None,
            ..state
        };
        self.states.save(&def.code, &reset).await?;
        info!("Job {} reset, next at {:?}", def.code, next_time_ms);
        Ok(())
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
