//! Finalizing transactions.
//!
//! Two retry shapes exist for a failed commit:
//!
//! - **Whole cycle**: the transaction's base version is stale, so the
//!   transaction is abandoned and the coordinator restarts from a version
//!   read. [`CommitCoordinator::commit_in_cycle`] makes that decision.
//! - **Bounded**: the caller knows the baseline is still valid and only
//!   wants resilience against transient commit-endpoint errors.
//!   [`CommitCoordinator::commit_with_bounded_retry`] retries the same id.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{CommitReceipt, Transaction, TransactionApi};
use crate::classify::{RetryClass, classify};
use crate::config::{DEFAULT_COMMIT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_MS};
use crate::context::CallContext;
use crate::error::{Error, Phase, Result};
use crate::metrics;

/// What the outer loop should do after a commit attempt.
#[derive(Debug)]
pub enum CommitDecision {
    /// The transaction is committed.
    Committed(CommitReceipt),
    /// The failure was a known race; abandon the transaction and restart.
    Restart {
        /// Classification of the failure.
        class: RetryClass,
        /// The commit error, with `commit` context.
        error: Error,
    },
    /// The failure is fatal; return it to the caller.
    Failed(Error),
}

/// Commits transactions with either in-place or whole-cycle retry.
#[derive(Clone)]
pub struct CommitCoordinator {
    api: Arc<dyn TransactionApi>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl CommitCoordinator {
    /// Creates a commit coordinator with the default bounds.
    #[must_use]
    pub fn new(api: Arc<dyn TransactionApi>) -> Self {
        Self {
            api,
            max_attempts: DEFAULT_COMMIT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }

    /// Sets the attempt bound for bounded retry (at least one attempt).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the delay between bounded retry attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Commits `transaction` once.
    ///
    /// # Errors
    ///
    /// Returns the transport, API or status error wrapped with `commit`
    /// context and the transaction id.
    pub async fn commit_once(
        &self,
        ctx: &CallContext,
        transaction: &Transaction,
    ) -> Result<CommitReceipt> {
        tracing::debug!(
            transaction_id = %transaction.id,
            base_version = %transaction.base_version,
            "committing transaction"
        );
        self.commit_id(ctx, &transaction.id).await
    }

    /// Commits the transaction named `transaction_id` once.
    ///
    /// The commit endpoint only needs the id, so callers holding an id from
    /// elsewhere (another process, the CLI) need no base version.
    ///
    /// # Errors
    ///
    /// Same as [`CommitCoordinator::commit_once`].
    pub async fn commit_id(&self, ctx: &CallContext, transaction_id: &str) -> Result<CommitReceipt> {
        match self.api.commit_transaction(ctx, transaction_id).await {
            Ok(receipt) => {
                metrics::record_commit("committed");
                tracing::info!(
                    transaction_id,
                    status_code = receipt.status_code,
                    "committed transaction"
                );
                Ok(receipt)
            }
            Err(err) => {
                metrics::record_commit("failed");
                Err(err.in_phase(Phase::Commit, Some(transaction_id)))
            }
        }
    }

    /// Commits once and decides how the outer loop continues.
    pub async fn commit_in_cycle(
        &self,
        ctx: &CallContext,
        transaction: &Transaction,
    ) -> CommitDecision {
        match self.commit_once(ctx, transaction).await {
            Ok(receipt) => CommitDecision::Committed(receipt),
            Err(error) => {
                let class = classify(&error);
                if class.is_retryable() {
                    CommitDecision::Restart { class, error }
                } else {
                    CommitDecision::Failed(error)
                }
            }
        }
    }

    /// Commits `transaction`, retrying the same id on retryable failures.
    ///
    /// # Errors
    ///
    /// Returns a fatal commit error immediately, or
    /// [`Error::RetryExhausted`] once the attempt bound is reached.
    pub async fn commit_with_bounded_retry(
        &self,
        ctx: &CallContext,
        transaction: &Transaction,
    ) -> Result<CommitReceipt> {
        self.commit_id_with_bounded_retry(ctx, &transaction.id).await
    }

    /// Bounded retry of [`CommitCoordinator::commit_id`].
    ///
    /// # Errors
    ///
    /// Same as [`CommitCoordinator::commit_with_bounded_retry`].
    pub async fn commit_id_with_bounded_retry(
        &self,
        ctx: &CallContext,
        transaction_id: &str,
    ) -> Result<CommitReceipt> {
        let mut attempt = 1;
        loop {
            let err = match self.commit_id(ctx, transaction_id).await {
                Ok(receipt) => return Ok(receipt),
                Err(err) => err,
            };

            let class = classify(&err);
            if !class.is_retryable() {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                return Err(Error::RetryExhausted {
                    phase: Phase::Commit,
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            metrics::record_retry(Phase::Commit, class);
            tracing::warn!(
                transaction_id,
                class = %class,
                attempt,
                max_attempts = self.max_attempts,
                error = %err,
                "commit failed; retrying same transaction"
            );
            ctx.sleep(self.retry_delay).await?;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Fault, MemoryDataPlane, Operation, TransactionState};
    use crate::version::ConfigurationVersion;

    async fn open(plane: &MemoryDataPlane) -> Transaction {
        let version = ConfigurationVersion::from(plane.version().expect("version"));
        plane
            .create_transaction(&CallContext::background(), &version)
            .await
            .expect("create")
    }

    fn coordinator(plane: &MemoryDataPlane) -> CommitCoordinator {
        CommitCoordinator::new(Arc::new(plane.clone()))
            .with_max_attempts(3)
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn bounded_retry_recovers_from_transient_not_found() {
        let plane = MemoryDataPlane::new();
        let tx = open(&plane).await;
        plane
            .inject(
                Operation::Commit,
                Fault::api(400, "transaction does not exist"),
            )
            .expect("inject");

        let receipt = coordinator(&plane)
            .commit_with_bounded_retry(&CallContext::background(), &tx)
            .await
            .expect("second attempt commits");
        assert_eq!(receipt.transaction_id, tx.id);
        assert_eq!(plane.calls(Operation::Commit).expect("calls"), 2);
        assert_eq!(
            plane.transaction_state(&tx.id).expect("state"),
            Some(TransactionState::Committed)
        );
    }

    #[tokio::test]
    async fn bounded_retry_stops_on_fatal() {
        let plane = MemoryDataPlane::new();
        let tx = open(&plane).await;
        plane
            .inject(Operation::Commit, Fault::api(500, "internal error"))
            .expect("inject");

        let err = coordinator(&plane)
            .commit_with_bounded_retry(&CallContext::background(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Context { phase: Phase::Commit, .. }));
        assert_eq!(plane.calls(Operation::Commit).expect("calls"), 1);
    }

    #[tokio::test]
    async fn bounded_retry_exhausts_on_persistent_outdated() {
        let plane = MemoryDataPlane::new();
        let tx = open(&plane).await;
        plane.bump_version().expect("bump");

        let err = coordinator(&plane)
            .commit_with_bounded_retry(&CallContext::background(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RetryExhausted {
                phase: Phase::Commit,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(classify(&err), RetryClass::TransactionOutdated);
        assert_eq!(plane.calls(Operation::Commit).expect("calls"), 3);
    }

    #[tokio::test]
    async fn commit_in_cycle_restarts_on_outdated() {
        let plane = MemoryDataPlane::new();
        let tx = open(&plane).await;
        plane.bump_version().expect("bump");

        let decision = coordinator(&plane)
            .commit_in_cycle(&CallContext::background(), &tx)
            .await;
        assert!(matches!(
            decision,
            CommitDecision::Restart {
                class: RetryClass::TransactionOutdated,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn commit_once_wraps_errors_with_transaction_id() {
        let plane = MemoryDataPlane::new();
        let err = coordinator(&plane)
            .commit_once(
                &CallContext::background(),
                &Transaction::new("missing", ConfigurationVersion::from(1)),
            )
            .await
            .unwrap_err();
        match err {
            Error::Context {
                phase,
                transaction_id,
                ..
            } => {
                assert_eq!(phase, Phase::Commit);
                assert_eq!(transaction_id.as_deref(), Some("missing"));
            }
            other => panic!("expected context error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn commit_by_id_needs_no_base_version() {
        let plane = MemoryDataPlane::new();
        let tx = open(&plane).await;
        plane
            .inject(
                Operation::Commit,
                Fault::api(400, "transaction does not exist"),
            )
            .expect("inject");

        let receipt = coordinator(&plane)
            .commit_id_with_bounded_retry(&CallContext::background(), &tx.id)
            .await
            .expect("second attempt commits");
        assert_eq!(receipt.transaction_id, tx.id);
        assert_eq!(plane.calls(Operation::Commit).expect("calls"), 2);
        assert_eq!(plane.calls(Operation::VersionRead).expect("calls"), 0);
    }
}
