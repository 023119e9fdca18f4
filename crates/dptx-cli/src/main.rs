//! dptx CLI - stage and commit configuration transactions.
//!
//! The main entry point for the `dptx` CLI binary.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dptx_cli::{Cli, Commands, commands};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
    dptx_core::metrics::register_metrics();

    // Parse CLI arguments
    let cli = Cli::parse();
    let config = cli.config();

    // Create runtime and execute
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Version => commands::version::execute(&config).await,
            Commands::Begin => commands::begin::execute(&config).await,
            Commands::Commit(args) => commands::commit::execute(args, &config).await,
            Commands::Rollback(args) => commands::rollback::execute(args, &config).await,
            Commands::Apply(args) => commands::apply::execute(args, &config).await,
        }
    })
}
