//! The whole-cycle transaction loop.
//!
//! [`TransactionCoordinator`] drives one logical operation through
//! version read, transaction creation, mutation and commit. A failure that
//! classifies as a known race abandons the transaction and starts a fresh
//! cycle; anything else is returned with phase context.
//!
//! ```text
//! Idle -> VersionRead -> TransactionOpen -> Mutating -> CommitAttempt
//!   ^                                          |             |
//!   +------------- Abandoned (retryable) ------+-------------+
//!                                                   |
//!                                       Committed | Failed
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;
use ulid::Ulid;

use crate::api::{CommitReceipt, DeleteOutcome, Transaction, TransactionApi};
use crate::classify::{RetryClass, classify};
use crate::commit::{CommitCoordinator, CommitDecision};
use crate::config::{CoordinatorConfig, RetryPolicy};
use crate::context::CallContext;
use crate::error::{Error, Phase, Result};
use crate::factory::TransactionFactory;
use crate::metrics;
use crate::mutation::Mutation;
use crate::observability::transaction_span;
use crate::rollback::RollbackAgent;
use crate::serializer::ConcurrencySerializer;

/// States of the driving loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// Between cycles.
    Idle,
    /// Reading the base version.
    VersionRead,
    /// Opening a transaction against the base version.
    TransactionOpen,
    /// Applying the caller's mutation.
    Mutating,
    /// Committing the transaction.
    CommitAttempt,
    /// The transaction is committed.
    Committed,
    /// The transaction was discarded after a retryable failure.
    Abandoned,
    /// The operation failed.
    Failed,
}

impl CycleState {
    /// Returns the state name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::VersionRead => "version_read",
            Self::TransactionOpen => "transaction_open",
            Self::Mutating => "mutating",
            Self::CommitAttempt => "commit_attempt",
            Self::Committed => "committed",
            Self::Abandoned => "abandoned",
            Self::Failed => "failed",
        }
    }

    /// Returns true for states that end a cycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Abandoned | Self::Failed)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully coordinated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<T> {
    /// Output of the mutation in the committed cycle.
    pub value: T,
    /// The commit acknowledgement.
    pub receipt: CommitReceipt,
    /// Number of cycles used, including the committed one.
    pub cycles: u32,
}

enum CycleOutcome<T> {
    Committed { value: T, receipt: CommitReceipt },
    Restart { class: RetryClass, error: Error },
    Failed(Error),
}

/// Coordinates version-stamped transactions against the remote service.
///
/// Cheap to share behind an `Arc`; concurrent callers only contend on the
/// [`ConcurrencySerializer`] while a base version is bound to a new
/// transaction.
#[derive(Clone)]
pub struct TransactionCoordinator {
    serializer: Arc<ConcurrencySerializer>,
    factory: TransactionFactory,
    commits: CommitCoordinator,
    rollbacks: RollbackAgent,
    policy: RetryPolicy,
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TransactionCoordinator {
    /// Creates a coordinator with its own serializer.
    #[must_use]
    pub fn new(api: Arc<dyn TransactionApi>, config: &CoordinatorConfig) -> Self {
        let retry_delay = config.retry_delay();
        Self {
            serializer: ConcurrencySerializer::shared(),
            factory: TransactionFactory::new(Arc::clone(&api))
                .with_max_attempts(config.create_max_attempts)
                .with_retry_delay(retry_delay),
            commits: CommitCoordinator::new(Arc::clone(&api))
                .with_max_attempts(config.commit_max_attempts)
                .with_retry_delay(retry_delay),
            rollbacks: RollbackAgent::new(api),
            policy: config.retry_policy(),
        }
    }

    /// Replaces the serializer, e.g. with one shared by several coordinators.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<ConcurrencySerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Replaces the outer-loop retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the serializer guarding version read and creation.
    #[must_use]
    pub fn serializer(&self) -> &Arc<ConcurrencySerializer> {
        &self.serializer
    }

    /// Returns the outer-loop retry policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Reads the current version and opens a transaction bound to it.
    ///
    /// Both steps run inside the serializer's critical section.
    ///
    /// # Errors
    ///
    /// Returns a `version_read` error, or the factory's `create` error.
    pub async fn begin(&self, ctx: &CallContext) -> Result<Transaction> {
        let _guard = self.serializer.enter().await;
        let version = self.factory.oracle().current_version(ctx).await?;
        self.factory.create(ctx, version).await
    }

    /// Commits `transaction` once.
    ///
    /// # Errors
    ///
    /// Returns the commit failure with `commit` context.
    pub async fn commit(&self, ctx: &CallContext, transaction: &Transaction) -> Result<CommitReceipt> {
        self.commits.commit_once(ctx, transaction).await
    }

    /// Commits `transaction`, retrying the same id on retryable failures.
    ///
    /// # Errors
    ///
    /// Returns a fatal commit error, or [`Error::RetryExhausted`].
    pub async fn commit_with_bounded_retry(
        &self,
        ctx: &CallContext,
        transaction: &Transaction,
    ) -> Result<CommitReceipt> {
        self.commits.commit_with_bounded_retry(ctx, transaction).await
    }

    /// Commits a transaction known only by id, optionally with bounded retry.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionCoordinator::commit`] and
    /// [`TransactionCoordinator::commit_with_bounded_retry`].
    pub async fn commit_id(
        &self,
        ctx: &CallContext,
        transaction_id: &str,
        retry: bool,
    ) -> Result<CommitReceipt> {
        if retry {
            self.commits
                .commit_id_with_bounded_retry(ctx, transaction_id)
                .await
        } else {
            self.commits.commit_id(ctx, transaction_id).await
        }
    }

    /// Deletes `transaction_id`; a transaction that is already gone is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns any other delete failure with `rollback` context.
    pub async fn rollback(&self, ctx: &CallContext, transaction_id: &str) -> Result<DeleteOutcome> {
        self.rollbacks.rollback(ctx, transaction_id).await
    }

    /// Runs `mutation` inside a transaction until it commits.
    ///
    /// Every cycle opens a fresh transaction. Retryable failures from the
    /// mutation or the commit discard that transaction and, if the
    /// [`RetryPolicy`] allows, start another cycle after the cycle delay.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error with phase context,
    /// [`Error::RetryExhausted`] when the policy stops the loop, or
    /// [`Error::Cancelled`] when `ctx` is cancelled.
    pub async fn execute<M>(&self, ctx: &CallContext, mutation: &M) -> Result<Committed<M::Output>>
    where
        M: Mutation + ?Sized,
    {
        let operation_id = Ulid::new().to_string();
        let span = transaction_span("execute", &operation_id);
        self.execute_cycles(ctx, mutation).instrument(span).await
    }

    async fn execute_cycles<M>(&self, ctx: &CallContext, mutation: &M) -> Result<Committed<M::Output>>
    where
        M: Mutation + ?Sized,
    {
        let started = Instant::now();
        let mut cycles = 0;

        loop {
            cycles += 1;
            match self.run_cycle(ctx, mutation).await {
                CycleOutcome::Committed { value, receipt } => {
                    metrics::record_cycle("committed");
                    return Ok(Committed {
                        value,
                        receipt,
                        cycles,
                    });
                }
                CycleOutcome::Failed(err) => {
                    metrics::record_cycle("failed");
                    return Err(err);
                }
                CycleOutcome::Restart { class, error } => {
                    metrics::record_cycle("abandoned");
                    let phase = error.phase().unwrap_or(Phase::Commit);
                    if !self.policy.allows_another(cycles, started.elapsed()) {
                        tracing::warn!(cycles, class = %class, "retry policy exhausted");
                        return Err(Error::RetryExhausted {
                            phase,
                            attempts: cycles,
                            source: Box::new(error),
                        });
                    }

                    metrics::record_retry(phase, class);
                    tracing::warn!(
                        cycle = cycles,
                        class = %class,
                        phase = %phase,
                        delay_ms = duration_millis(self.policy.cycle_delay),
                        error = %error,
                        "transaction abandoned; restarting cycle"
                    );
                    transition(CycleState::Abandoned, CycleState::Idle);
                    ctx.sleep(self.policy.cycle_delay).await?;
                }
            }
        }
    }

    async fn run_cycle<M>(&self, ctx: &CallContext, mutation: &M) -> CycleOutcome<M::Output>
    where
        M: Mutation + ?Sized,
    {
        transition(CycleState::Idle, CycleState::VersionRead);
        let transaction = match self.begin(ctx).await {
            Ok(transaction) => transaction,
            Err(err) => {
                transition(CycleState::VersionRead, CycleState::Failed);
                return CycleOutcome::Failed(err);
            }
        };
        tracing::Span::current().record("transaction_id", transaction.id.as_str());
        transition(CycleState::TransactionOpen, CycleState::Mutating);

        let value = match mutation.apply(ctx, &transaction).await {
            Ok(value) => value,
            Err(err) => {
                self.rollbacks
                    .rollback_best_effort(ctx, &transaction.id)
                    .await;
                let error = err.in_phase(Phase::Mutate, Some(&transaction.id));
                let class = classify(&error);
                return if class.is_retryable() {
                    transition(CycleState::Mutating, CycleState::Abandoned);
                    CycleOutcome::Restart { class, error }
                } else {
                    transition(CycleState::Mutating, CycleState::Failed);
                    CycleOutcome::Failed(error)
                };
            }
        };

        transition(CycleState::Mutating, CycleState::CommitAttempt);
        match self.commits.commit_in_cycle(ctx, &transaction).await {
            CommitDecision::Committed(receipt) => {
                transition(CycleState::CommitAttempt, CycleState::Committed);
                CycleOutcome::Committed { value, receipt }
            }
            CommitDecision::Restart { class, error } => {
                self.rollbacks
                    .rollback_best_effort(ctx, &transaction.id)
                    .await;
                transition(CycleState::CommitAttempt, CycleState::Abandoned);
                CycleOutcome::Restart { class, error }
            }
            CommitDecision::Failed(error) => {
                self.rollbacks
                    .rollback_best_effort(ctx, &transaction.id)
                    .await;
                transition(CycleState::CommitAttempt, CycleState::Failed);
                CycleOutcome::Failed(error)
            }
        }
    }
}

fn transition(from: CycleState, to: CycleState) {
    tracing::debug!(from = %from, to = %to, "cycle state transition");
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Fault, MemoryDataPlane, Operation, TransactionState};
    use crate::mutation::{NoopMutation, mutation_fn};

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            retry_delay_ms: 1,
            cycle_delay_ms: 1,
            ..CoordinatorConfig::default()
        }
    }

    fn coordinator(plane: &MemoryDataPlane) -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::new(plane.clone()), &config())
    }

    fn staging(
        plane: &MemoryDataPlane,
        label: &'static str,
    ) -> impl Mutation<Output = String> {
        let plane = plane.clone();
        mutation_fn(move |_ctx, tx: Transaction| {
            let plane = plane.clone();
            async move {
                plane.stage(&tx.id, label)?;
                Ok::<_, Error>(tx.id)
            }
        })
    }

    #[tokio::test]
    async fn execute_commits_in_one_cycle() {
        let plane = MemoryDataPlane::new();
        let committed = coordinator(&plane)
            .execute(&CallContext::background(), &staging(&plane, "backend web"))
            .await
            .expect("commits");

        assert_eq!(committed.cycles, 1);
        assert_eq!(committed.receipt.transaction_id, committed.value);
        assert_eq!(
            plane.committed_writes().expect("writes"),
            vec!["backend web".to_string()]
        );
    }

    #[tokio::test]
    async fn outdated_commit_restarts_with_a_fresh_transaction() {
        let plane = MemoryDataPlane::new();
        let external = plane.clone();
        let bumped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mutation = mutation_fn(move |_ctx, tx: Transaction| {
            let external = external.clone();
            let bumped = Arc::clone(&bumped);
            async move {
                external.stage(&tx.id, "server s1")?;
                if !bumped.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    external.bump_version()?;
                }
                Ok::<_, Error>(tx.id)
            }
        });

        let committed = coordinator(&plane)
            .execute(&CallContext::background(), &mutation)
            .await
            .expect("second cycle commits");

        let ids = plane.transaction_ids().expect("ids");
        assert_eq!(committed.cycles, 2);
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(
            plane.transaction_state(&ids[0]).expect("state"),
            Some(TransactionState::Deleted)
        );
        assert_eq!(committed.value, ids[1]);
        assert_eq!(
            plane.committed_writes().expect("writes"),
            vec!["server s1".to_string()]
        );
    }

    #[tokio::test]
    async fn fatal_commit_fails_after_one_attempt() {
        let plane = MemoryDataPlane::new();
        plane
            .inject(Operation::Commit, Fault::api(500, "internal error"))
            .expect("inject");

        let err = coordinator(&plane)
            .execute(&CallContext::background(), &NoopMutation)
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Commit));
        assert_eq!(plane.calls(Operation::Commit).expect("calls"), 1);
        assert_eq!(plane.calls(Operation::Create).expect("calls"), 1);
    }

    #[tokio::test]
    async fn fatal_mutation_rolls_back_and_fails() {
        let plane = MemoryDataPlane::new();
        let mutation = mutation_fn(|_ctx, _tx| async {
            Err::<(), _>(Error::mutation("backend name is invalid"))
        });

        let err = coordinator(&plane)
            .execute(&CallContext::background(), &mutation)
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Mutate));
        let ids = plane.transaction_ids().expect("ids");
        assert_eq!(ids.len(), 1);
        assert_eq!(
            plane.transaction_state(&ids[0]).expect("state"),
            Some(TransactionState::Deleted)
        );
        assert_eq!(plane.calls(Operation::Commit).expect("calls"), 0);
    }

    #[tokio::test]
    async fn retryable_mutation_failure_restarts() {
        let plane = MemoryDataPlane::new();
        plane
            .inject(Operation::Delete, Fault::Transport("reset".to_string()))
            .expect("inject");
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let mutation = mutation_fn(move |_ctx, _tx| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    return Err(Error::mutation_with_source(
                        "stage backend",
                        Error::Api(crate::error::ApiError::new(
                            400,
                            "transaction does not exist",
                        )),
                    ));
                }
                Ok::<_, Error>(())
            }
        });

        let committed = coordinator(&plane)
            .execute(&CallContext::background(), &mutation)
            .await
            .expect("commits after restart");
        assert_eq!(committed.cycles, 2);
        assert_eq!(plane.calls(Operation::Delete).expect("calls"), 1);
    }

    #[tokio::test]
    async fn policy_bounds_the_number_of_cycles() {
        let plane = MemoryDataPlane::new();
        let external = plane.clone();
        let mutation = mutation_fn(move |_ctx, _tx| {
            let external = external.clone();
            async move {
                external.bump_version()?;
                Ok::<_, Error>(())
            }
        });
        let policy = RetryPolicy {
            max_cycles: Some(3),
            max_elapsed: None,
            cycle_delay: Duration::from_millis(1),
        };

        let err = coordinator(&plane)
            .with_policy(policy)
            .execute(&CallContext::background(), &mutation)
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
        assert_eq!(plane.transaction_ids().expect("ids").len(), 3);
    }

    #[tokio::test]
    async fn version_read_failure_is_fatal() {
        let plane = MemoryDataPlane::new();
        plane
            .inject(Operation::VersionRead, Fault::Transport("refused".to_string()))
            .expect("inject");

        let err = coordinator(&plane)
            .execute(&CallContext::background(), &NoopMutation)
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::VersionRead));
        assert_eq!(plane.calls(Operation::Create).expect("calls"), 0);
    }

    #[tokio::test]
    async fn cancelled_context_stops_before_any_call() {
        let plane = MemoryDataPlane::new();
        let ctx = CallContext::background();
        ctx.cancel();

        let err = coordinator(&plane)
            .execute(&ctx, &NoopMutation)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(classify(&err), RetryClass::Fatal);
        assert_eq!(plane.calls(Operation::VersionRead).expect("calls"), 0);
    }

    #[tokio::test]
    async fn begin_heals_a_version_race() {
        let plane = MemoryDataPlane::new();
        plane
            .inject(Operation::Create, Fault::api(409, "version mismatch"))
            .expect("inject");

        let tx = coordinator(&plane)
            .begin(&CallContext::background())
            .await
            .expect("second create succeeds");

        assert_eq!(tx.base_version.as_str(), "1");
        assert_eq!(plane.calls(Operation::Create).expect("calls"), 2);
        assert_eq!(plane.calls(Operation::VersionRead).expect("calls"), 2);
    }

    #[tokio::test]
    async fn shared_serializer_is_used_by_both_coordinators() {
        let plane = MemoryDataPlane::new();
        let shared = ConcurrencySerializer::shared();
        let a = coordinator(&plane).with_serializer(Arc::clone(&shared));
        let b = coordinator(&plane).with_serializer(Arc::clone(&shared));
        assert!(Arc::ptr_eq(a.serializer(), b.serializer()));

        let ctx = CallContext::background();
        let (first, second) = tokio::join!(a.begin(&ctx), b.begin(&ctx));
        assert_ne!(first.expect("a").id, second.expect("b").id);
    }

    #[tokio::test]
    async fn commit_by_id_skips_the_version_read() {
        let plane = MemoryDataPlane::new();
        let coordinator = coordinator(&plane);
        let ctx = CallContext::background();

        let tx = coordinator.begin(&ctx).await.expect("begin");
        let receipt = coordinator
            .commit_id(&ctx, &tx.id, false)
            .await
            .expect("commit");

        assert_eq!(receipt.transaction_id, tx.id);
        assert_eq!(plane.calls(Operation::VersionRead).expect("calls"), 1);
        assert_eq!(
            plane.transaction_state(&tx.id).expect("state"),
            Some(TransactionState::Committed)
        );
    }

    #[tokio::test]
    async fn primitives_commit_and_roll_back() {
        let plane = MemoryDataPlane::new();
        let coordinator = coordinator(&plane);
        let ctx = CallContext::background();

        let committed = coordinator.begin(&ctx).await.expect("begin");
        coordinator.commit(&ctx, &committed).await.expect("commit");

        let discarded = coordinator.begin(&ctx).await.expect("begin");
        assert_eq!(
            coordinator.rollback(&ctx, &discarded.id).await.expect("rollback"),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            coordinator.rollback(&ctx, &discarded.id).await.expect("rollback"),
            DeleteOutcome::AlreadyGone
        );
    }

    #[test]
    fn terminal_states() {
        assert!(CycleState::Committed.is_terminal());
        assert!(CycleState::Abandoned.is_terminal());
        assert!(CycleState::Failed.is_terminal());
        assert!(!CycleState::Mutating.is_terminal());
        assert_eq!(CycleState::CommitAttempt.to_string(), "commit_attempt");
    }
}
