//! Discarding uncommitted transactions.
//!
//! The remote service has no semantic rollback. Deleting the transaction
//! discards its staged writes because they never reached the committed
//! configuration.

use std::sync::Arc;

use crate::api::{DeleteOutcome, TransactionApi};
use crate::classify::{RetryClass, classify};
use crate::context::CallContext;
use crate::error::{Phase, Result};
use crate::metrics;

/// Deletes transactions, tolerating ones that are already gone.
#[derive(Clone)]
pub struct RollbackAgent {
    api: Arc<dyn TransactionApi>,
}

impl RollbackAgent {
    /// Creates an agent deleting through the given API.
    #[must_use]
    pub fn new(api: Arc<dyn TransactionApi>) -> Self {
        Self { api }
    }

    /// Deletes `transaction_id`.
    ///
    /// A transaction the remote service no longer knows counts as rolled
    /// back, so calling this twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns any other failure wrapped with `rollback` context.
    pub async fn rollback(&self, ctx: &CallContext, transaction_id: &str) -> Result<DeleteOutcome> {
        match self.api.delete_transaction(ctx, transaction_id).await {
            Ok(outcome) => {
                let label = match outcome {
                    DeleteOutcome::Deleted => "deleted",
                    DeleteOutcome::AlreadyGone => "already_gone",
                };
                metrics::record_rollback(label);
                tracing::debug!(transaction_id, outcome = label, "rolled back transaction");
                Ok(outcome)
            }
            Err(err) if classify(&err) == RetryClass::TransactionNotFound => {
                metrics::record_rollback("already_gone");
                tracing::debug!(transaction_id, "transaction already gone");
                Ok(DeleteOutcome::AlreadyGone)
            }
            Err(err) => {
                metrics::record_rollback("failed");
                Err(err.in_phase(Phase::Rollback, Some(transaction_id)))
            }
        }
    }

    /// Deletes `transaction_id` as a failure-cleanup step.
    ///
    /// Never fails: the error that triggered the cleanup is what matters to
    /// the caller, so rollback failures are only logged.
    pub async fn rollback_best_effort(&self, ctx: &CallContext, transaction_id: &str) {
        if let Err(err) = self.rollback(ctx, transaction_id).await {
            tracing::warn!(
                transaction_id,
                error = %err,
                "best-effort rollback failed; staged writes remain until the service expires them"
            );
        }
    }
}
