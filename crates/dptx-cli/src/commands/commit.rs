//! Commit command - commit an open transaction.

use anyhow::{Context, Result};
use clap::Args;
use dptx_core::{CallContext, CommitReceipt};
use owo_colors::OwoColorize;

use crate::Config;
use crate::client::{Session, interruptible_context};
use crate::commands::print_report;

/// Arguments for the commit command.
#[derive(Debug, Args)]
pub struct CommitArgs {
    /// Transaction ID to commit.
    #[arg()]
    pub transaction_id: String,

    /// Retry the same transaction on retryable failures.
    #[arg(long)]
    pub retry: bool,
}

/// Commits the transaction named by `args`.
///
/// # Errors
///
/// Returns an error if the commit fails.
pub async fn run(args: &CommitArgs, session: &Session, ctx: &CallContext) -> Result<CommitReceipt> {
    session
        .coordinator()
        .commit_id(ctx, &args.transaction_id, args.retry)
        .await
        .with_context(|| format!("Failed to commit transaction {}", args.transaction_id))
}

/// Execute the commit command.
///
/// # Errors
///
/// Returns an error if the session cannot be created or the commit fails.
pub async fn execute(args: CommitArgs, config: &Config) -> Result<()> {
    let session = Session::new(config)?;
    let receipt = run(&args, &session, &interruptible_context()).await?;
    print_report(
        &config.format,
        &"Transaction committed".green().to_string(),
        &receipt,
        vec![
            ("Transaction ID", receipt.transaction_id.clone()),
            ("Status Code", receipt.status_code.to_string()),
            (
                "Status",
                receipt.status.clone().unwrap_or_else(|| "-".to_string()),
            ),
            ("Committed At", receipt.committed_at.to_rfc3339()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_commit_args_parsing() {
        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            args: CommitArgs,
        }

        let cli = TestCli::parse_from(["test", "tx-9"]);
        assert_eq!(cli.args.transaction_id, "tx-9");
        assert!(!cli.args.retry);

        let cli = TestCli::parse_from(["test", "tx-9", "--retry"]);
        assert!(cli.args.retry);
    }
}
