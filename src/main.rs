//! Chainkeeper - multi-node job coordination and resilient blockchain endpoints.
//!
//! Main entry point for the node and its maintenance commands.

mod adapters;
mod cli;
mod handlers;
mod server;
mod signal;

#[cfg(test)]
mod test_support;

use clap::Parser;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command.unwrap_or_default() {
        Commands::Run {
            node_id,
            memory_store,
        } => {
            let (config, warnings) = server::load_validated(&cli.config)?;
            server::init_tracing(&config.logging)?;
            server::log_warnings(&warnings);
            server::run_node(cli.config, config, node_id, memory_store).await
        }
        Commands::CheckConfig => server::check_config(&cli.config),
        Commands::Endpoints => {
            let (config, _) = server::load_validated(&cli.config)?;
            server::init_tracing(&config.logging)?;
            server::print_endpoints(&config).await
        }
    }
}
