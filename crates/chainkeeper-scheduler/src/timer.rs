//! Cancellable per-job timers.
//!
//! One timer drives one job. The timer owns its next fire time; `cancel()`
//! stops it for good and `reschedule()` moves the next fire.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::DateTime;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::job::ScheduleKind;

/// Invoked on every fire.
pub type FireCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

enum TimerPlan {
    Cron(Box<cron::Schedule>),
    FixedDelay(i64),
    FixedRate(i64),
}

impl TimerPlan {
    fn from_schedule(code: &str, schedule: &ScheduleKind) -> Result<Self, SchedulerError> {
        match schedule {
            ScheduleKind::Cron { expression } => {
                let expression = expression.trim();
                if expression.is_empty() {
                    return Err(SchedulerError::InvalidDefinition {
                        code: code.to_string(),
                        message: "cron job requires an expression".to_string(),
                    });
                }
                let parsed = cron::Schedule::from_str(expression).map_err(|e| {
                    SchedulerError::InvalidDefinition {
                        code: code.to_string(),
                        message: format!("invalid cron expression '{}': {}", expression, e),
                    }
                })?;
                Ok(TimerPlan::Cron(Box::new(parsed)))
            }
            ScheduleKind::FixedDelay { interval_ms } => Ok(TimerPlan::FixedDelay(*interval_ms)),
            ScheduleKind::FixedRate { interval_ms } => Ok(TimerPlan::FixedRate(*interval_ms)),
        }
    }

    fn first_fire(&self, start_ms: i64, now_ms: i64) -> Option<i64> {
        match self {
            TimerPlan::Cron(schedule) => cron_after(schedule, start_ms.max(now_ms)),
            TimerPlan::FixedDelay(_) => Some(start_ms),
            TimerPlan::FixedRate(_) => Some(start_ms - start_ms.rem_euclid(1000)),
        }
    }
}

fn cron_after(schedule: &cron::Schedule, after_ms: i64) -> Option<i64> {
    let after = DateTime::from_timestamp_millis(after_ms)?;
    schedule.after(&after).next().map(|t| t.timestamp_millis())
}

/// Timer for a single job.
pub struct JobTimer {
    code: String,
    plan: TimerPlan,
    clock: Arc<dyn Clock>,
    next_fire: Mutex<Option<i64>>,
    in_flight: AtomicBool,
    fire_count: AtomicU64,
    cancel: CancellationToken,
    rearm: Notify,
}

impl JobTimer {
    /// Arm a timer whose first fire is derived from `start_ms`.
    ///
    /// Fixed-rate starts are floored to the second. Cron fires at the first
    /// match after `max(now, start_ms)`.
    pub fn start(
        code: impl Into<String>,
        schedule: &ScheduleKind,
        start_ms: i64,
        clock: Arc<dyn Clock>,
        callback: FireCallback,
    ) -> Result<Arc<Self>, SchedulerError> {
        let code = code.into();
        let plan = TimerPlan::from_schedule(&code, schedule)?;
        let first = plan.first_fire(start_ms, clock.now_ms());

        let timer = Arc::new(Self {
            code,
            plan,
            clock,
            next_fire: Mutex::new(first),
            in_flight: AtomicBool::new(false),
            fire_count: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            rearm: Notify::new(),
        });

        debug!("Timer {} armed, first fire at {:?}", timer.code, first);
        tokio::spawn(timer.clone().run(callback));
        Ok(timer)
    }

    /// First fire time a timer started now would use.
    pub fn first_fire(
        code: &str,
        schedule: &ScheduleKind,
        start_ms: i64,
        now_ms: i64,
    ) -> Result<Option<i64>, SchedulerError> {
        Ok(TimerPlan::from_schedule(code, schedule)?.first_fire(start_ms, now_ms))
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn fire_count(&self) -> u64 {
        self.fire_count.load(Ordering::SeqCst)
    }

    /// Next time this timer will fire.
    ///
    /// While a fixed-delay callback runs this projects `now + interval`.
    /// `None` after cancellation or once a one-shot timer has fired.
    pub fn next_invocation(&self) -> Option<i64> {
        if !self.is_active() {
            return None;
        }
        if let TimerPlan::FixedDelay(interval) = self.plan {
            if self.in_flight.load(Ordering::SeqCst) {
                return (interval > 0).then(|| self.clock.now_ms() + interval);
            }
        }
        *self.next_fire.lock()
    }

    /// Move the next fire to `next_ms`.
    pub fn reschedule(&self, next_ms: i64) {
        *self.next_fire.lock() = Some(next_ms);
        self.rearm.notify_one();
        debug!("Timer {} rescheduled to {}", self.code, next_ms);
    }

    /// Stop the timer. A callback already running is not interrupted.
    pub fn cancel(&self) {
        self.cancel.cancel();
        debug!("Timer {} cancelled", self.code);
    }

    async fn run(self: Arc<Self>, callback: FireCallback) {
        loop {
            let next = *self.next_fire.lock();
            let Some(next) = next else {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.rearm.notified() => {}
                }
                continue;
            };

            let wait = Duration::from_millis((next - self.clock.now_ms()).max(0) as u64);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.rearm.notified() => continue,
                _ = tokio::time::sleep(wait) => {}
            }

            self.fire_count.fetch_add(1, Ordering::SeqCst);
            match self.plan {
                TimerPlan::FixedRate(interval) => {
                    *self.next_fire.lock() = (interval > 0).then_some(next + interval);
                    tokio::spawn(callback());
                }
                TimerPlan::Cron(ref schedule) => {
                    let after = self.clock.now_ms().max(next);
                    *self.next_fire.lock() = cron_after(schedule, after);
                    tokio::spawn(callback());
                }
                TimerPlan::FixedDelay(interval) => {
                    self.in_flight.store(true, Ordering::SeqCst);
                    *self.next_fire.lock() = None;
                    callback().await;
                    self.in_flight.store(false, Ordering::SeqCst);
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    *self.next_fire.lock() =
                        (interval > 0).then(|| self.clock.now_ms() + interval);
                }
            }
        }
        debug!("Timer {} stopped after {} fire(s)", self.code, self.fire_count());
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
