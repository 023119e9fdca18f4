//! Rollback command - delete an uncommitted transaction.

use anyhow::{Context, Result};
use clap::Args;
use dptx_core::{CallContext, DeleteOutcome};
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::Config;
use crate::client::{Session, interruptible_context};
use crate::commands::print_report;

/// Arguments for the rollback command.
#[derive(Debug, Args)]
pub struct RollbackArgs {
    /// Transaction ID to delete.
    #[arg()]
    pub transaction_id: String,
}

/// Result of the rollback command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    /// The deleted transaction.
    pub transaction_id: String,
    /// `deleted` or `already_gone`.
    pub outcome: &'static str,
}

/// Deletes the transaction named by `args`.
///
/// # Errors
///
/// Returns an error if the delete fails for a reason other than the
/// transaction being gone.
pub async fn run(
    args: &RollbackArgs,
    session: &Session,
    ctx: &CallContext,
) -> Result<RollbackReport> {
    let outcome = session
        .coordinator()
        .rollback(ctx, &args.transaction_id)
        .await
        .with_context(|| format!("Failed to roll back transaction {}", args.transaction_id))?;
    Ok(RollbackReport {
        transaction_id: args.transaction_id.clone(),
        outcome: match outcome {
            DeleteOutcome::Deleted => "deleted",
            DeleteOutcome::AlreadyGone => "already_gone",
        },
    })
}

/// Execute the rollback command.
///
/// # Errors
///
/// Returns an error if the session cannot be created or the delete fails.
pub async fn execute(args: RollbackArgs, config: &Config) -> Result<()> {
    let session = Session::new(config)?;
    let report = run(&args, &session, &interruptible_context()).await?;
    let headline = match report.outcome {
        "deleted" => "Transaction rolled back".yellow().to_string(),
        _ => "Transaction already gone".dimmed().to_string(),
    };
    print_report(
        &config.format,
        &headline,
        &report,
        vec![
            ("Transaction ID", report.transaction_id.clone()),
            ("Outcome", report.outcome.to_string()),
        ],
    )
}
