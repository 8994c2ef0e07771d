//! Scheduler and job definition configuration types.

use serde::{Deserialize, Serialize};

use super::default_true;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Watchdog sweep period.
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_ms: u64,

    /// How far past `next_time` an ENDED job may drift before it is reset.
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,

    /// Job definitions.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: default_watchdog_interval(),
            grace_period_ms: default_grace_period(),
            jobs: Vec::new(),
        }
    }
}

fn default_watchdog_interval() -> u64 {
    5000
}

fn default_grace_period() -> u64 {
    10_000
}

/// Schedule kind of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Cron,
    FixedDelay,
    FixedRate,
}

/// A single job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job code.
    pub code: String,

    /// Display name used in run identities. Defaults to the code.
    #[serde(default)]
    pub name: Option<String>,

    pub kind: JobKind,

    /// Six-field cron expression (`sec min hour dom month dow`).
    #[serde(default)]
    pub cron: Option<String>,

    /// Interval for fixed-delay and fixed-rate jobs. Negative means one-shot.
    #[serde(default)]
    pub interval_ms: i64,

    #[serde(default)]
    pub initial_delay_ms: u64,

    #[serde(default = "default_job_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name of the registered job handler.
    pub handler: String,

    /// Positional parameters passed to the handler.
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl JobConfig {
    /// Display name, falling back to the code.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.code)
    }
}

fn default_job_timeout() -> u64 {
    60_000
}
