//! Version command - show the current configuration version.

use anyhow::{Context, Result};
use dptx_core::{CallContext, TransactionApi};
use serde::Serialize;

use crate::Config;
use crate::client::{Session, interruptible_context};
use crate::commands::print_report;

/// Result of the version command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionReport {
    /// Current configuration version.
    pub version: String,
}

/// Reads the current version.
///
/// # Errors
///
/// Returns an error if the version cannot be read.
pub async fn run(session: &Session, ctx: &CallContext) -> Result<VersionReport> {
    let version = session
        .client()
        .current_version(ctx)
        .await
        .context("Failed to read configuration version")?;
    Ok(VersionReport {
        version: version.to_string(),
    })
}

/// Execute the version command.
///
/// # Errors
///
/// Returns an error if the session cannot be created or the read fails.
pub async fn execute(config: &Config) -> Result<()> {
    let session = Session::new(config)?;
    let report = run(&session, &interruptible_context()).await?;
    print_report(
        &config.format,
        "Configuration version",
        &report,
        vec![("Version", report.version.clone())],
    )
}
