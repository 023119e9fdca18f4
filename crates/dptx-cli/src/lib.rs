//! # dptx-cli
//!
//! Command-line interface for version-stamped configuration transactions.
//!
//! ## Commands
//!
//! - `dptx version` - Show the current configuration version
//! - `dptx begin` - Open a transaction against the current version
//! - `dptx commit <id>` - Commit a transaction (`--retry` for bounded retry)
//! - `dptx rollback <id>` - Delete an uncommitted transaction
//! - `dptx apply <file>` - Stage a JSON list of writes and commit them
//!
//! ## Configuration
//!
//! The CLI uses environment variables or command-line flags for settings:
//!
//! - `DPTX_API_URL` - API endpoint (default: `http://localhost:5555`)
//! - `DPTX_API_USERNAME` / `DPTX_API_PASSWORD` - basic auth credentials
//! - `DPTX_REQUEST_TIMEOUT_SECS` - per-request timeout
//!
//! Retry bounds are read from the `DPTX_*` coordinator variables documented
//! on [`CoordinatorConfig::from_env`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod client;
pub mod commands;

use clap::{Parser, Subcommand};
use dptx_core::config::{ClientConfig, CoordinatorConfig, DEFAULT_REQUEST_TIMEOUT_SECS};

/// dptx CLI - stage and commit configuration transactions.
#[derive(Debug, Parser)]
#[command(name = "dptx")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// API server URL.
    #[arg(long, env = "DPTX_API_URL", default_value = "http://localhost:5555")]
    pub api_url: String,

    /// Basic auth username.
    #[arg(long, env = "DPTX_API_USERNAME")]
    pub username: Option<String>,

    /// Basic auth password.
    #[arg(long, env = "DPTX_API_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "DPTX_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            client: ClientConfig {
                base_url: self.api_url.clone(),
                username: self.username.clone(),
                password: self.password.clone(),
                request_timeout_secs: self.timeout_secs,
            },
            coordinator: None,
            format: self.format.clone(),
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the current configuration version.
    Version,
    /// Open a transaction against the current version.
    Begin,
    /// Commit a transaction.
    Commit(commands::commit::CommitArgs),
    /// Delete an uncommitted transaction.
    Rollback(commands::rollback::RollbackArgs),
    /// Stage a list of writes and commit them as one transaction.
    Apply(commands::apply::ApplyArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// CLI configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Connection settings for the remote service.
    pub client: ClientConfig,
    /// Retry settings; read from the environment when `None`.
    pub coordinator: Option<CoordinatorConfig>,
    /// Output format.
    pub format: OutputFormat,
}
