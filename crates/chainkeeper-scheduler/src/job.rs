//! Job definitions and shared runtime state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a job's fire times are computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Next time matching a six-field cron expression.
    Cron { expression: String },
    /// Finish time of the previous run plus the interval.
    FixedDelay { interval_ms: i64 },
    /// Previous scheduled fire plus the interval, regardless of completion.
    FixedRate { interval_ms: i64 },
}

impl ScheduleKind {
    pub fn interval_ms(&self) -> Option<i64> {
        match self {
            ScheduleKind::Cron { .. } => None,
            ScheduleKind::FixedDelay { interval_ms } | ScheduleKind::FixedRate { interval_ms } => {
                Some(*interval_ms)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScheduleKind::Cron { .. } => "cron",
            ScheduleKind::FixedDelay { .. } => "fixed_delay",
            ScheduleKind::FixedRate { .. } => "fixed_rate",
        }
    }
}

/// Static job definition. Never mutated after registration.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub code: String,
    pub name: String,
    pub schedule: ScheduleKind,
    pub initial_delay_ms: u64,
    pub timeout_ms: u64,
    pub enabled: bool,
    pub handler: String,
    pub params: Vec<Value>,
}

impl JobDefinition {
    pub fn new(code: impl Into<String>, handler: impl Into<String>, schedule: ScheduleKind) -> Self {
        let code = code.into();
        Self {
            name: code.clone(),
            code,
            schedule,
            initial_delay_ms: 0,
            timeout_ms: 60_000,
            enabled: true,
            handler: handler.into(),
            params: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    pub fn with_timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout_ms = timeout;
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Run status stored for each job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    #[default]
    Init,
    Running,
    Ended,
}

/// Mutable job state shared by all nodes through the coordination store.
///
/// Times are unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRuntimeState {
    #[serde(default)]
    pub last_start_ms: i64,
    /// `None` once a one-shot job has completed.
    #[serde(default)]
    pub next_time_ms: Option<i64>,
    #[serde(default)]
    pub execution_time_ms: i64,
    #[serde(default)]
    pub status: RunStatus,
    /// Identity of the attempt that last wrote RUNNING.
    #[serde(default)]
    pub run_id: Option<String>,
}

impl JobRuntimeState {
    /// RUNNING and started at or before `now - timeout`.
    pub fn is_timed_out(&self, now_ms: i64, timeout_ms: u64) -> bool {
        self.status == RunStatus::Running && self.last_start_ms <= now_ms - timeout_ms as i64
    }
}

/// One successful `start`, carried through to `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunAttempt {
    pub code: String,
    pub run_id: String,
    pub start_time_ms: i64,
}

impl RunAttempt {
    /// Run identity is `{name}-{node}-{uuid}`.
    pub fn new(def: &JobDefinition, node_id: &str, start_time_ms: i64) -> Self {
        Self {
            code: def.code.clone(),
            run_id: format!("{}-{}-{}", def.name, node_id, Uuid::new_v4()),
            start_time_ms,
        }
    }
}

/// Trailing context passed to every job body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    pub start_time_ms: i64,
    pub timeout_ms: u64,
}
