//! Configuration loader.

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.chainkeeper`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{JobKind, StoreMode};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.leader.ttl_secs, 10);
        assert_eq!(config.coordination.key_prefix, "chainkeeper:");
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
            [node]
            id = "node-a"

            [coordination]
            url = "redis://10.0.0.1:7000,redis://10.0.0.2:7000"
            mode = "cluster"
            key_prefix = "prod:"

            [[scheduler.jobs]]
            code = "height"
            kind = "cron"
            cron = "0 */5 * * * *"
            handler = "chain_height"
            params = ["ethereum"]

            [[web3.endpoints]]
            network = "ethereum"
            url = "https://rpc.example"
            kind = "rpc"
            priority = 4

            [[subscriptions.contracts]]
            network = "ethereum"
            address = "0x0000000000000000000000000000000000000001"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.node.id, "node-a");
        assert_eq!(config.coordination.mode, StoreMode::Cluster);
        assert_eq!(config.coordination.urls().len(), 2);
        assert_eq!(config.scheduler.jobs[0].kind, JobKind::Cron);
        assert_eq!(config.web3.endpoints[0].priority, 4);
        assert_eq!(config.subscriptions.contracts.len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[leader]").unwrap();
        writeln!(file, "heartbeat_interval_ms = 2000").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.leader.heartbeat_interval_ms, 2000);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/chainkeeper.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("invalid = [unclosed");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_unknown_job_kind() {
        let content = r#"
            [[scheduler.jobs]]
            code = "x"
            kind = "hourly"
            handler = "log"
        "#;
        assert!(ConfigLoader::load_str(content).is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: This test runs in isolation and sets a unique test-only env var
        unsafe {
            std::env::set_var("CHAINKEEPER_TEST_REDIS", "redis://cache:6379");
        }
        let content = "[coordination]\nurl = \"${CHAINKEEPER_TEST_REDIS}\"";
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.coordination.url, "redis://cache:6379");
        unsafe {
            std::env::remove_var("CHAINKEEPER_TEST_REDIS");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${NONEXISTENT_CHAINKEEPER_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let content = "value = \"no variables here\"";
        let expanded = ConfigLoader::expand_env_vars(content).unwrap();
        assert_eq!(expanded, content);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = ConfigLoader::expand_path("~/logs");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("/logs"));
    }

    #[test]
    fn test_expand_path_no_tilde() {
        assert_eq!(ConfigLoader::expand_path("/var/log"), "/var/log");
    }
}
