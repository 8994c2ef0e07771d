//! Configuration validation.

use std::collections::HashSet;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::schema::{Config, EndpointKindConfig, JobKind};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the collected errors into a single `ConfigError`.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        if self.errors.is_empty() {
            return Ok(self.warnings);
        }
        let joined = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ConfigError::Invalid(joined))
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_node(config, &mut result);
        Self::validate_coordination(config, &mut result);
        Self::validate_jobs(config, &mut result);
        Self::validate_endpoints(config, &mut result);
        Self::validate_subscriptions(config, &mut result);

        Ok(result)
    }

    /// Report job definitions whose handler is not in `known`.
    pub fn validate_handlers(config: &Config, known: &[&str], result: &mut ValidationResult) {
        for (i, job) in config.scheduler.jobs.iter().enumerate() {
            if !known.contains(&job.handler.as_str()) {
                result.add_error(ValidationError::new(
                    format!("scheduler.jobs[{}].handler", i),
                    format!("Unknown handler '{}', available: {:?}", job.handler, known),
                ));
            }
        }
    }

    fn validate_node(config: &Config, result: &mut ValidationResult) {
        if config.node.id.trim().is_empty() {
            result.add_error(ValidationError::new("node.id", "Node id cannot be empty"));
        }
    }

    fn validate_coordination(config: &Config, result: &mut ValidationResult) {
        if config.coordination.urls().is_empty() {
            result.add_error(ValidationError::new(
                "coordination.url",
                "Coordination store URL cannot be empty",
            ));
        }

        if config.coordination.lock_max_ttl_secs == 0 {
            result.add_error(ValidationError::new(
                "coordination.lock_max_ttl_secs",
                "lock_max_ttl_secs must be greater than 0",
            ));
        }

        if config.leader.ttl_secs == 0 {
            result.add_error(ValidationError::new(
                "leader.ttl_secs",
                "ttl_secs must be greater than 0",
            ));
        } else if config.leader.ttl_secs * 1000 <= config.leader.heartbeat_interval_ms {
            result.add_warning(ValidationWarning::new(
                "leader.ttl_secs",
                "Leader key expires before the next heartbeat, leadership will flap",
            ));
        }
    }

    fn validate_jobs(config: &Config, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        let max_ttl_ms = config.coordination.lock_max_ttl_secs.saturating_mul(1000);

        for (i, job) in config.scheduler.jobs.iter().enumerate() {
            let path = format!("scheduler.jobs[{}]", i);

            if job.code.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.code", path),
                    "Job code cannot be empty",
                ));
            } else if !seen.insert(job.code.as_str()) {
                result.add_error(ValidationError::new(
                    format!("{}.code", path),
                    format!("Duplicate job code '{}'", job.code),
                ));
            }

            match job.kind {
                JobKind::Cron => match job.cron.as_deref().map(str::trim) {
                    None | Some("") => result.add_error(ValidationError::new(
                        format!("{}.cron", path),
                        "Cron job requires a cron expression",
                    )),
                    Some(expr) => {
                        if let Err(e) = cron::Schedule::from_str(expr) {
                            result.add_error(ValidationError::new(
                                format!("{}.cron", path),
                                format!("Invalid cron expression '{}': {}", expr, e),
                            ));
                        }
                    }
                },
                JobKind::FixedDelay | JobKind::FixedRate => {
                    if job.interval_ms == 0 {
                        result.add_error(ValidationError::new(
                            format!("{}.interval_ms", path),
                            "interval_ms cannot be 0, use a negative value for a one-shot job",
                        ));
                    } else if job.interval_ms < 0 {
                        result.add_warning(ValidationWarning::new(
                            format!("{}.interval_ms", path),
                            format!("Job '{}' has a negative interval and runs once", job.code),
                        ));
                    }
                }
            }

            if job.timeout_ms == 0 {
                result.add_error(ValidationError::new(
                    format!("{}.timeout_ms", path),
                    "timeout_ms must be greater than 0",
                ));
            } else if job.timeout_ms > max_ttl_ms {
                result.add_warning(ValidationWarning::new(
                    format!("{}.timeout_ms", path),
                    format!(
                        "Timeout exceeds the lock TTL cap of {}s, the lock may expire during a run",
                        config.coordination.lock_max_ttl_secs
                    ),
                ));
            }

            if job.handler.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.handler", path),
                    "Job handler cannot be empty",
                ));
            }
        }
    }

    fn validate_endpoints(config: &Config, result: &mut ValidationResult) {
        for (i, endpoint) in config.web3.endpoints.iter().enumerate() {
            let path = format!("web3.endpoints[{}]", i);

            if endpoint.network.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.network", path),
                    "Endpoint network cannot be empty",
                ));
            }

            if endpoint.url.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.url", path),
                    "Endpoint URL cannot be empty",
                ));
                continue;
            }

            let schemes: &[&str] = match endpoint.kind {
                EndpointKindConfig::Rpc => &["http://", "https://"],
                EndpointKindConfig::Wss => &["ws://", "wss://"],
            };
            if !schemes.iter().any(|s| endpoint.url.starts_with(s)) {
                result.add_error(ValidationError::new(
                    format!("{}.url", path),
                    format!("URL must start with one of {:?}", schemes),
                ));
            }
        }
    }

    fn validate_subscriptions(config: &Config, result: &mut ValidationResult) {
        let subs = &config.subscriptions;

        if subs.concurrency == 0 {
            result.add_error(ValidationError::new(
                "subscriptions.concurrency",
                "concurrency must be greater than 0",
            ));
        }

        for (i, sub) in subs.contracts.iter().enumerate() {
            let path = format!("subscriptions.contracts[{}]", i);

            if sub.address.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.address", path),
                    "Contract address cannot be empty",
                ));
            }

            let has_wss = config
                .web3
                .endpoints
                .iter()
                .any(|e| e.network == sub.network && e.kind == EndpointKindConfig::Wss);
            if !has_wss {
                result.add_warning(ValidationWarning::new(
                    format!("{}.network", path),
                    format!("No wss endpoint configured for network '{}'", sub.network),
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
