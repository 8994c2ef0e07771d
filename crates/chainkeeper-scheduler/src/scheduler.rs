//! Scheduler core: one timer per job, each fire routed through the run coordinator.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::coordinator::{RunCoordinator, StartOutcome};
use crate::error::{JobError, SchedulerError};
use crate::handler::HandlerRegistry;
use crate::job::{JobContext, JobDefinition};
use crate::registry::JobRegistry;
use crate::timer::{FireCallback, JobTimer};

/// Owns job timers and drives executions.
pub struct Scheduler {
    registry: RwLock<Arc<JobRegistry>>,
    handlers: Arc<HandlerRegistry>,
    coordinator: Arc<RunCoordinator>,
    clock: Arc<dyn Clock>,
    timers: Mutex<HashMap<String, Arc<JobTimer>>>,
    self_ref: Weak<Scheduler>,
}

impl Scheduler {
    pub fn new(
        registry: JobRegistry,
        handlers: Arc<HandlerRegistry>,
        coordinator: Arc<RunCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            registry: RwLock::new(Arc::new(registry)),
            handlers,
            coordinator,
            clock,
            timers: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn coordinator(&self) -> &Arc<RunCoordinator> {
        &self.coordinator
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current definitions in registration order.
    pub fn definitions(&self) -> Vec<Arc<JobDefinition>> {
        self.registry.read().definitions()
    }

    pub fn definition(&self, code: &str) -> Option<Arc<JobDefinition>> {
        self.registry.read().get(code)
    }

    /// Active timer of a job.
    pub fn timer(&self, code: &str) -> Option<Arc<JobTimer>> {
        self.timers.lock().get(code).cloned()
    }

    /// Reset and arm every job. Returns the number of armed jobs.
    ///
    /// Definitions naming an unknown handler are logged and skipped.
    pub async fn start_all(&self) -> usize {
        let mut armed = 0;
        for def in self.definitions() {
            if !self.handlers.contains(&def.handler) {
                error!(
                    "Job {} skipped, handler {} is not registered",
                    def.code, def.handler
                );
                continue;
            }
            match self.reset_job(&def.code).await {
                Ok(()) if def.enabled => armed += 1,
                Ok(()) => {}
                Err(e) => error!("Failed to start job {}: {}", def.code, e),
            }
        }
        info!("Scheduler started {} of {} job(s)", armed, self.registry.read().len());
        armed
    }

    /// (Re)create the timer of a job, starting after its initial delay.
    pub fn create_job(&self, code: &str) -> Result<(), SchedulerError> {
        let def = self
            .definition(code)
            .ok_or_else(|| SchedulerError::JobNotFound(code.to_string()))?;
        let start = self.clock.now_ms() + def.initial_delay_ms as i64;
        self.arm(&def, start)
    }

    fn arm(&self, def: &JobDefinition, start_ms: i64) -> Result<(), SchedulerError> {
        if let Some(old) = self.timers.lock().remove(&def.code) {
            old.cancel();
        }
        if !def.enabled {
            info!("Job {} is disabled, not scheduled", def.code);
            return Ok(());
        }
        if !self.handlers.contains(&def.handler) {
            return Err(SchedulerError::UnknownHandler {
                code: def.code.clone(),
                handler: def.handler.clone(),
            });
        }

        let timer = JobTimer::start(
            def.code.clone(),
            &def.schedule,
            start_ms,
            self.clock.clone(),
            self.fire_callback(&def.code),
        )?;
        debug!(
            "Job {} armed ({}), next at {:?}",
            def.code,
            def.schedule.label(),
            timer.next_invocation()
        );
        self.timers.lock().insert(def.code.clone(), timer);
        Ok(())
    }

    fn fire_callback(&self, code: &str) -> FireCallback {
        let scheduler = self.self_ref.clone();
        let code = code.to_string();
        Arc::new(move || {
            let scheduler = scheduler.clone();
            let code = code.clone();
            Box::pin(async move {
                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.execute(&code).await;
                }
            })
        })
    }

    /// Run one attempt of a job. Returns whether the body was executed.
    ///
    /// Body failures and panics are logged here and never propagate. The
    /// run is still ended so the next tick is recorded.
    pub async fn execute(&self, code: &str) -> bool {
        let Some(def) = self.definition(code) else {
            warn!("Job {} fired but is no longer defined", code);
            return false;
        };

        let attempt = match self.coordinator.try_start(&def).await {
            Ok(StartOutcome::Started(attempt)) => attempt,
            Ok(outcome) => {
                debug!("Job {} not started: {:?}", code, outcome);
                return false;
            }
            Err(e) => {
                error!("Job {} failed to start: {}", code, e);
                return false;
            }
        };

        info!("Job {} run {} started", code, attempt.run_id);
        let ctx = JobContext {
            start_time_ms: attempt.start_time_ms,
            timeout_ms: def.timeout_ms,
        };

        let executed = match self.handlers.get(&def.handler) {
            Some(handler) => {
                let result = AssertUnwindSafe(handler.run(&def.params, ctx))
                    .catch_unwind()
                    .await;
                match result {
                    Ok(Ok(())) => {
                        info!(
                            "Job {} run {} completed in {}ms",
                            code,
                            attempt.run_id,
                            self.clock.now_ms() - attempt.start_time_ms
                        );
                        true
                    }
                    Ok(Err(JobError::LockUnavailable(key))) => {
                        warn!(
                            "Job {} run {} not executed, failed to get lock {}",
                            code, attempt.run_id, key
                        );
                        false
                    }
                    Ok(Err(e)) => {
                        error!("Job {} run {} failed: {}", code, attempt.run_id, e);
                        true
                    }
                    Err(panic) => {
                        error!(
                            "Job {} run {} panicked: {}",
                            code,
                            attempt.run_id,
                            panic_message(panic.as_ref())
                        );
                        true
                    }
                }
            }
            None => {
                error!("Job {} handler {} is not registered", code, def.handler);
                false
            }
        };

        let next = self.timer(code).and_then(|t| t.next_invocation());
        if let Err(e) = self.coordinator.end(&attempt, next).await {
            error!("Job {} run {} failed to end: {}", code, attempt.run_id, e);
        }
        executed
    }

    /// Clear a job's lock and state, then re-arm it.
    pub async fn reset_job(&self, code: &str) -> Result<(), SchedulerError> {
        let def = self
            .definition(code)
            .ok_or_else(|| SchedulerError::JobNotFound(code.to_string()))?;

        let now = self.clock.now_ms();
        let start = now + def.initial_delay_ms as i64;
        let next = JobTimer::first_fire(&def.code, &def.schedule, start, now)?;

        if let Err(e) = self.coordinator.reset_state(&def, next).await {
            error!("Job {} state reset failed: {}", code, e);
        }
        self.arm(&def, start)
    }

    /// Swap in a new set of definitions and re-arm every timer.
    ///
    /// The current registry is kept if the new one is invalid.
    pub fn reconfigure(&self, definitions: Vec<JobDefinition>) -> Result<usize, SchedulerError> {
        let registry = Arc::new(JobRegistry::from_definitions(definitions)?);
        self.cancel_timers();
        *self.registry.write() = registry;

        let mut armed = 0;
        for def in self.definitions() {
            match self.create_job(&def.code) {
                Ok(()) if def.enabled => armed += 1,
                Ok(()) => {}
                Err(e) => error!("Failed to schedule job {}: {}", def.code, e),
            }
        }
        info!("Scheduler reconfigured with {} armed job(s)", armed);
        Ok(armed)
    }

    /// Cancel every timer. Running bodies finish on their own.
    pub fn shutdown(&self) {
        let count = self.cancel_timers();
        info!("Scheduler stopped, {} timer(s) cancelled", count);
    }

    fn cancel_timers(&self) -> usize {
        let timers: Vec<_> = self.timers.lock().drain().collect();
        for (_, timer) in &timers {
            timer.cancel();
        }
        timers.len()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
