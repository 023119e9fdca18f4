//! Apply command - stage a list of writes and commit them atomically.
//!
//! The file holds a JSON array of writes:
//!
//! ```json
//! [
//!   {"method": "POST", "path": "/services/haproxy/configuration/backends", "body": {"name": "web"}},
//!   {"method": "DELETE", "path": "/services/haproxy/configuration/backends/legacy"}
//! ]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use dptx_core::{CallContext, StagedWrite, StagedWrites};
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::Config;
use crate::client::{Session, interruptible_context};
use crate::commands::print_report;

/// Arguments for the apply command.
#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Path to the writes file (JSON).
    #[arg()]
    pub file: PathBuf,
}

/// Result of the apply command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    /// The committed transaction.
    pub transaction_id: String,
    /// Cycles used, including the committed one.
    pub cycles: u32,
    /// Number of writes staged.
    pub writes: usize,
    /// HTTP status of the commit.
    pub status_code: u16,
    /// When the commit was acknowledged.
    pub committed_at: String,
    /// Response bodies of the staged writes in the committed cycle.
    pub responses: Vec<serde_json::Value>,
}

/// Reads and validates the writes file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_writes(file: &Path) -> Result<Vec<StagedWrite>> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read writes file: {}", file.display()))?;
    serde_json::from_str(&content).with_context(|| "Failed to parse writes JSON")
}

/// Stages and commits the writes named by `args`.
///
/// # Errors
///
/// Returns an error if the writes are invalid or the transaction fails.
pub async fn run(args: &ApplyArgs, session: &Session, ctx: &CallContext) -> Result<ApplyReport> {
    let writes = load_writes(&args.file)?;
    let count = writes.len();
    let mutation =
        StagedWrites::new(Arc::clone(session.client()), writes).context("Invalid writes")?;

    let committed = session
        .coordinator()
        .execute(ctx, &mutation)
        .await
        .context("Failed to apply writes")?;

    Ok(ApplyReport {
        transaction_id: committed.receipt.transaction_id,
        cycles: committed.cycles,
        writes: count,
        status_code: committed.receipt.status_code,
        committed_at: committed.receipt.committed_at.to_rfc3339(),
        responses: committed.value,
    })
}

/// Execute the apply command.
///
/// # Errors
///
/// Returns an error if the session cannot be created or the writes cannot be
/// committed.
pub async fn execute(args: ApplyArgs, config: &Config) -> Result<()> {
    let session = Session::new(config)?;
    let report = run(&args, &session, &interruptible_context()).await?;
    print_report(
        &config.format,
        &"Writes committed".green().to_string(),
        &report,
        vec![
            ("Transaction ID", report.transaction_id.clone()),
            ("Writes", report.writes.to_string()),
            ("Cycles", report.cycles.to_string()),
            ("Status Code", report.status_code.to_string()),
            ("Committed At", report.committed_at.clone()),
        ],
    )
}
