//! The four primitives of the remote configuration service.
//!
//! [`TransactionApi`] is the seam between the coordinator and the wire.
//! [`DataPlaneClient`](crate::client::DataPlaneClient) implements it over
//! HTTP; tests may substitute any other implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::CallContext;
use crate::error::Result;
use crate::version::ConfigurationVersion;

/// A server-side staging area bound to a base version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Opaque transaction identifier assigned by the remote service.
    pub id: String,
    /// The configuration version the transaction was opened against.
    pub base_version: ConfigurationVersion,
}

impl Transaction {
    /// Creates a transaction handle.
    #[must_use]
    pub fn new(id: impl Into<String>, base_version: ConfigurationVersion) -> Self {
        Self {
            id: id.into(),
            base_version,
        }
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    /// The committed transaction.
    pub transaction_id: String,
    /// HTTP status returned by the commit endpoint (200 or 202).
    pub status_code: u16,
    /// Status string reported in the response body, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// When the commit was acknowledged locally.
    pub committed_at: DateTime<Utc>,
}

/// Outcome of deleting a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The transaction existed and was deleted.
    Deleted,
    /// The remote service no longer knows the transaction.
    AlreadyGone,
}

/// Primitive operations exposed by the remote configuration service.
#[async_trait]
pub trait TransactionApi: Send + Sync {
    /// Reads the current configuration version.
    async fn current_version(&self, ctx: &CallContext) -> Result<ConfigurationVersion>;

    /// Opens a transaction bound to `base_version`.
    async fn create_transaction(
        &self,
        ctx: &CallContext,
        base_version: &ConfigurationVersion,
    ) -> Result<Transaction>;

    /// Commits a transaction once, with no retry.
    async fn commit_transaction(
        &self,
        ctx: &CallContext,
        transaction_id: &str,
    ) -> Result<CommitReceipt>;

    /// Deletes an uncommitted transaction, discarding its staged writes.
    async fn delete_transaction(
        &self,
        ctx: &CallContext,
        transaction_id: &str,
    ) -> Result<DeleteOutcome>;
}
