//! Begin command - open a transaction against the current version.

use anyhow::{Context, Result};
use dptx_core::CallContext;
use serde::Serialize;

use crate::Config;
use crate::client::{Session, interruptible_context};
use crate::commands::print_report;

/// Result of the begin command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginReport {
    /// Id of the opened transaction.
    pub transaction_id: String,
    /// Version the transaction is bound to.
    pub base_version: String,
}

/// Opens a transaction.
///
/// # Errors
///
/// Returns an error if the version read or creation fails.
pub async fn run(session: &Session, ctx: &CallContext) -> Result<BeginReport> {
    let transaction = session
        .coordinator()
        .begin(ctx)
        .await
        .context("Failed to open transaction")?;
    Ok(BeginReport {
        transaction_id: transaction.id,
        base_version: transaction.base_version.to_string(),
    })
}

/// Execute the begin command.
///
/// # Errors
///
/// Returns an error if the session cannot be created or the transaction
/// cannot be opened.
pub async fn execute(config: &Config) -> Result<()> {
    let session = Session::new(config)?;
    let report = run(&session, &interruptible_context()).await?;
    print_report(
        &config.format,
        "Transaction opened",
        &report,
        vec![
            ("Transaction ID", report.transaction_id.clone()),
            ("Base Version", report.base_version.clone()),
        ],
    )
}
