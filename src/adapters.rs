//! Conversions from configuration types into the runtime types of each crate.

use chainkeeper_config::{
    Config, EndpointEntry, EndpointKindConfig, JobConfig, JobKind, StoreMode, SubscriptionsConfig,
};
use chainkeeper_coordination::RedisTopology;
use chainkeeper_scheduler::{JobDefinition, ScheduleKind};
use chainkeeper_web3::{EndpointConfig, EndpointKind, SubscriberSettings};

/// Build a job definition from its config entry.
///
/// The validator rejects cron jobs without an expression, so an empty
/// expression here only reaches the scheduler when validation was skipped.
pub(crate) fn job_definition(job: &JobConfig) -> JobDefinition {
    let schedule = match job.kind {
        JobKind::Cron => ScheduleKind::Cron {
            expression: job.cron.clone().unwrap_or_default(),
        },
        JobKind::FixedDelay => ScheduleKind::FixedDelay {
            interval_ms: job.interval_ms,
        },
        JobKind::FixedRate => ScheduleKind::FixedRate {
            interval_ms: job.interval_ms,
        },
    };

    JobDefinition::new(&job.code, &job.handler, schedule)
        .with_name(job.display_name())
        .with_initial_delay_ms(job.initial_delay_ms)
        .with_timeout_ms(job.timeout_ms)
        .with_params(job.params.clone())
        .with_enabled(job.enabled)
}

pub(crate) fn job_definitions(config: &Config) -> Vec<JobDefinition> {
    config.scheduler.jobs.iter().map(job_definition).collect()
}

pub(crate) fn endpoint_config(entry: &EndpointEntry) -> EndpointConfig {
    let kind = match entry.kind {
        EndpointKindConfig::Rpc => EndpointKind::Rpc,
        EndpointKindConfig::Wss => EndpointKind::Wss,
    };
    EndpointConfig::new(&entry.network, &entry.url, kind, entry.priority)
}

pub(crate) fn endpoint_configs(config: &Config) -> Vec<EndpointConfig> {
    config.web3.endpoints.iter().map(endpoint_config).collect()
}

pub(crate) fn subscriber_settings(config: &SubscriptionsConfig) -> SubscriberSettings {
    SubscriberSettings {
        health_check_interval_ms: config.health_check_interval_ms,
        max_check_wait_ms: config.max_check_wait_ms,
        window_blocks: config.window_blocks,
        confirmation_lag: config.confirmation_lag,
        concurrency: config.concurrency,
        resubscribe_delay_ms: config.resubscribe_delay_ms,
        default_timeout_ms: config.default_timeout_ms,
    }
}

pub(crate) fn redis_topology(mode: StoreMode) -> RedisTopology {
    match mode {
        StoreMode::Single => RedisTopology::Single,
        StoreMode::Cluster => RedisTopology::Cluster,
    }
}
