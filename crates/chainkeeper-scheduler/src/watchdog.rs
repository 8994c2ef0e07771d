//! Periodic repair of jobs stuck in an inconsistent shared state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::job::{JobDefinition, JobRuntimeState, RunStatus};
use crate::scheduler::Scheduler;

/// Why a job was reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stall {
    /// RUNNING past its timeout; the holder is presumed dead.
    Stuck,
    /// ENDED but its next fire is overdue by more than the grace period.
    Missed,
}

/// Detects stuck or missed jobs and resets them.
pub struct Watchdog {
    scheduler: Arc<Scheduler>,
    interval_ms: AtomicU64,
    grace_period_ms: AtomicU64,
}

impl Watchdog {
    pub fn new(scheduler: Arc<Scheduler>, interval_ms: u64, grace_period_ms: u64) -> Self {
        Self {
            scheduler,
            interval_ms: AtomicU64::new(interval_ms),
            grace_period_ms: AtomicU64::new(grace_period_ms),
        }
    }

    pub fn update_timings(&self, interval_ms: u64, grace_period_ms: u64) {
        self.interval_ms.store(interval_ms, Ordering::SeqCst);
        self.grace_period_ms.store(grace_period_ms, Ordering::SeqCst);
    }

    /// Classify a job's shared state at `now`.
    pub fn classify(
        def: &JobDefinition,
        state: &JobRuntimeState,
        now_ms: i64,
        grace_period_ms: u64,
    ) -> Option<Stall> {
        match state.status {
            RunStatus::Running if state.is_timed_out(now_ms, def.timeout_ms) => Some(Stall::Stuck),
            RunStatus::Ended
                if state
                    .next_time_ms
                    .is_some_and(|next| next < now_ms - grace_period_ms as i64) =>
            {
                Some(Stall::Missed)
            }
            _ => None,
        }
    }

    /// Check every job once. Returns the codes that were reset.
    pub async fn sweep(&self) -> Vec<String> {
        let grace = self.grace_period_ms.load(Ordering::SeqCst);
        let mut reset = Vec::new();

        for def in self.scheduler.definitions() {
            let state = match self.scheduler.coordinator().states().load(&def.code).await {
                Ok(state) => state,
                Err(e) => {
                    warn!("Watchdog could not read job {}: {}", def.code, e);
                    continue;
                }
            };

            let now = self.scheduler.clock().now_ms();
            let Some(stall) = Self::classify(&def, &state, now, grace) else {
                continue;
            };

            warn!(
                "Watchdog resetting job {} ({:?}), status {:?} last start {} next {:?}",
                def.code, stall, state.status, state.last_start_ms, state.next_time_ms
            );
            match self.scheduler.reset_job(&def.code).await {
                Ok(()) => reset.push(def.code.clone()),
                Err(e) => error!("Watchdog failed to reset job {}: {}", def.code, e),
            }
        }
        reset
    }

    /// Sweep on a fixed period until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Watchdog started (interval: {}ms)",
                self.interval_ms.load(Ordering::SeqCst)
            );
            loop {
                let interval = Duration::from_millis(self.interval_ms.load(Ordering::SeqCst));
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        self.sweep().await;
                    }
                    _ = cancel.cancelled() => {
                        info!("Watchdog shutting down");
                        break;
                    }
                }
            }
        })
    }
}
