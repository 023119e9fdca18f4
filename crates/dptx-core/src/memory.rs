//! In-memory implementation of the remote transaction primitives.
//!
//! [`MemoryDataPlane`] follows the remote service's optimistic concurrency
//! rules (version mismatch on create, outdated transactions on commit) and
//! supports one-shot fault injection per operation. It is meant for testing
//! code built on the coordinator without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::api::{CommitReceipt, DeleteOutcome, Transaction, TransactionApi};
use crate::context::CallContext;
use crate::error::{ApiError, Error, Result};
use crate::version::ConfigurationVersion;

/// A primitive operation of the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `GET /configuration/version`.
    VersionRead,
    /// `POST /transactions`.
    Create,
    /// `PUT /transactions/{id}`.
    Commit,
    /// `DELETE /transactions/{id}`.
    Delete,
}

/// A failure injected into the next call of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// A structured rejection.
    Api(ApiError),
    /// A raw status error without a structured body.
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw body.
        body: String,
    },
    /// A transport failure.
    Transport(String),
}

impl Fault {
    /// Shorthand for a structured rejection.
    #[must_use]
    pub fn api(code: u16, message: impl Into<String>) -> Self {
        Self::Api(ApiError::new(code, message))
    }

    fn into_error(self) -> Error {
        match self {
            Self::Api(api) => Error::Api(api),
            Self::Status { status, body } => Error::Status { status, body },
            Self::Transport(message) => Error::transport(message),
        }
    }
}

/// Lifecycle state of a transaction held by [`MemoryDataPlane`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Created, accepting staged writes.
    Open,
    /// Committed; its writes are part of the configuration.
    Committed,
    /// Deleted; its writes were discarded.
    Deleted,
}

#[derive(Debug)]
struct StoredTransaction {
    base_version: u64,
    state: TransactionState,
    writes: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    version: u64,
    next_id: u64,
    transactions: HashMap<String, StoredTransaction>,
    order: Vec<String>,
    faults: HashMap<Operation, VecDeque<Fault>>,
    calls: HashMap<Operation, usize>,
    committed_writes: Vec<String>,
}

/// In-memory remote configuration service.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataPlane {
    state: Arc<RwLock<State>>,
}

impl MemoryDataPlane {
    /// Creates a service at version 1.
    #[must_use]
    pub fn new() -> Self {
        Self::with_version(1)
    }

    /// Creates a service at the given version.
    #[must_use]
    pub fn with_version(version: u64) -> Self {
        let plane = Self::default();
        if let Ok(mut state) = plane.state.write() {
            state.version = version;
        }
        plane
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::transport("memory data plane lock poisoned"))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::transport("memory data plane lock poisoned"))
    }

    fn begin_call(&self, op: Operation) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        let mut state = self.write()?;
        *state.calls.entry(op).or_default() += 1;
        if let Some(fault) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(fault.into_error());
        }
        Ok(state)
    }

    /// Queues a failure for the next call of `op`.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn inject(&self, op: Operation, fault: Fault) -> Result<()> {
        self.write()?.faults.entry(op).or_default().push_back(fault);
        Ok(())
    }

    /// Advances the version as an external writer would.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn bump_version(&self) -> Result<u64> {
        let mut state = self.write()?;
        state.version += 1;
        Ok(state.version)
    }

    /// Returns the current version.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn version(&self) -> Result<u64> {
        Ok(self.read()?.version)
    }

    /// Returns how many times `op` was called, including injected failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn calls(&self, op: Operation) -> Result<usize> {
        Ok(self.read()?.calls.get(&op).copied().unwrap_or_default())
    }

    /// Returns every transaction id ever created, in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn transaction_ids(&self) -> Result<Vec<String>> {
        Ok(self.read()?.order.clone())
    }

    /// Returns the state of a transaction, if it was ever created.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn transaction_state(&self, id: &str) -> Result<Option<TransactionState>> {
        Ok(self.read()?.transactions.get(id).map(|t| t.state))
    }

    /// Returns the writes that became part of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn committed_writes(&self) -> Result<Vec<String>> {
        Ok(self.read()?.committed_writes.clone())
    }

    /// Stages a labelled write inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns a 400 `transaction does not exist` API error if the
    /// transaction is unknown or no longer open.
    pub fn stage(&self, transaction_id: &str, write: impl Into<String>) -> Result<()> {
        let mut state = self.write()?;
        match state.transactions.get_mut(transaction_id) {
            Some(tx) if tx.state == TransactionState::Open => {
                tx.writes.push(write.into());
                Ok(())
            }
            _ => Err(ApiError::new(
                400,
                format!("transaction does not exist: {transaction_id}"),
            )
            .into()),
        }
    }
}

#[async_trait]
impl TransactionApi for MemoryDataPlane {
    async fn current_version(&self, ctx: &CallContext) -> Result<ConfigurationVersion> {
        ctx.check()?;
        let state = self.begin_call(Operation::VersionRead)?;
        Ok(ConfigurationVersion::from(state.version))
    }

    async fn create_transaction(
        &self,
        ctx: &CallContext,
        base_version: &ConfigurationVersion,
    ) -> Result<Transaction> {
        ctx.check()?;
        let mut state = self.begin_call(Operation::Create)?;
        if base_version.as_str() != state.version.to_string() {
            return Err(ApiError::new(409, "version mismatch").into());
        }

        state.next_id += 1;
        let id = format!("tx-{}", state.next_id);
        let base = state.version;
        state.transactions.insert(
            id.clone(),
            StoredTransaction {
                base_version: base,
                state: TransactionState::Open,
                writes: Vec::new(),
            },
        );
        state.order.push(id.clone());
        Ok(Transaction::new(id, base_version.clone()))
    }

    async fn commit_transaction(
        &self,
        ctx: &CallContext,
        transaction_id: &str,
    ) -> Result<CommitReceipt> {
        ctx.check()?;
        let mut state = self.begin_call(Operation::Commit)?;
        let current = state.version;

        let writes = match state.transactions.get_mut(transaction_id) {
            Some(tx) if tx.state == TransactionState::Open => {
                if tx.base_version != current {
                    return Err(ApiError::new(
                        406,
                        format!(
                            "transaction {transaction_id} of version {} is outdated and cannot be committed",
                            tx.base_version
                        ),
                    )
                    .into());
                }
                tx.state = TransactionState::Committed;
                std::mem::take(&mut tx.writes)
            }
            _ => {
                return Err(ApiError::new(
                    400,
                    format!("transaction does not exist: {transaction_id}"),
                )
                .into());
            }
        };

        state.version += 1;
        state.committed_writes.extend(writes);
        Ok(CommitReceipt {
            transaction_id: transaction_id.to_string(),
            status_code: 202,
            status: Some("success".to_string()),
            committed_at: Utc::now(),
        })
    }

    async fn delete_transaction(
        &self,
        ctx: &CallContext,
        transaction_id: &str,
    ) -> Result<DeleteOutcome> {
        ctx.check()?;
        let mut state = self.begin_call(Operation::Delete)?;
        match state.transactions.get_mut(transaction_id) {
            Some(tx) if tx.state == TransactionState::Open => {
                tx.state = TransactionState::Deleted;
                tx.writes.clear();
                Ok(DeleteOutcome::Deleted)
            }
            _ => Ok(DeleteOutcome::AlreadyGone),
        }
    }
}
