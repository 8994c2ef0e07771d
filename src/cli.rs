//! CLI definitions for Chainkeeper.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Chainkeeper CLI.
#[derive(Parser)]
#[command(name = "chainkeeper")]
#[command(about = "Multi-node job coordination and resilient blockchain endpoints")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub(crate) enum Commands {
    /// Run a node in foreground (default)
    Run {
        /// Override the configured node id
        #[arg(long)]
        node_id: Option<String>,

        /// Use an in-process store instead of Redis (single node only)
        #[arg(long)]
        memory_store: bool,
    },

    /// Validate the configuration and print the job table
    CheckConfig,

    /// Run one health check pass and print the selected endpoints
    Endpoints,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run {
            node_id: None,
            memory_store: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["chainkeeper"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config/default.toml"));
        assert!(cli.command.is_none());
        assert_eq!(cli.command.unwrap_or_default(), Commands::default());
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "chainkeeper",
            "run",
            "--node-id",
            "node-b",
            "--memory-store",
            "--config",
            "/etc/chainkeeper.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/chainkeeper.toml"));
        assert_eq!(
            cli.command,
            Some(Commands::Run {
                node_id: Some("node-b".to_string()),
                memory_store: true,
            })
        );
    }

    #[test]
    fn test_subcommands() {
        let cli = Cli::try_parse_from(["chainkeeper", "-c", "a.toml", "check-config"]).unwrap();
        assert_eq!(cli.command, Some(Commands::CheckConfig));

        let cli = Cli::try_parse_from(["chainkeeper", "endpoints"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Endpoints));
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["chainkeeper", "daemon"]).is_err());
    }
}
