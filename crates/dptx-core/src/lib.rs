//! # dptx-core
//!
//! Client-side coordination of version-stamped transactions against a remote
//! configuration service.
//!
//! The remote service exposes four primitives (read the configuration
//! version, create a transaction bound to a version, commit it, delete it)
//! and no native rollback. This crate turns them into an optimistic
//! concurrency loop:
//!
//! - **Version Oracle**: reads and normalizes the current version
//! - **Transaction Factory**: opens transactions, healing version races
//! - **Commit Coordinator**: commits once, with bounded retry, or per cycle
//! - **Rollback Agent**: idempotent best-effort deletion
//! - **Error Classifier**: maps failures onto retry classes
//! - **Transaction Coordinator**: the whole-cycle begin, mutate, commit loop
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use dptx_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let plane = MemoryDataPlane::new();
//! let coordinator = TransactionCoordinator::new(Arc::new(plane.clone()), &CoordinatorConfig::default());
//!
//! let committed = coordinator
//!     .execute(&CallContext::background(), &NoopMutation)
//!     .await?;
//! assert_eq!(committed.cycles, 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod api;
pub mod classify;
pub mod client;
pub mod commit;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod factory;
pub mod memory;
pub mod metrics;
pub mod mutation;
pub mod observability;
pub mod rollback;
pub mod serializer;
pub mod staging;
pub mod version;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use dptx_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::api::{CommitReceipt, DeleteOutcome, Transaction, TransactionApi};
    pub use crate::classify::{RetryClass, classify};
    pub use crate::client::DataPlaneClient;
    pub use crate::config::{ClientConfig, CoordinatorConfig, RetryPolicy};
    pub use crate::context::CallContext;
    pub use crate::coordinator::{Committed, CycleState, TransactionCoordinator};
    pub use crate::error::{ApiError, Error, Phase, Result};
    pub use crate::memory::MemoryDataPlane;
    pub use crate::mutation::{Mutation, NoopMutation, mutation_fn};
    pub use crate::serializer::ConcurrencySerializer;
    pub use crate::staging::{StagedWrite, StagedWrites, WriteMethod};
    pub use crate::version::ConfigurationVersion;
}

// Re-export key types at crate root for ergonomics
pub use api::{CommitReceipt, DeleteOutcome, Transaction, TransactionApi};
pub use classify::{RetryClass, classify};
pub use client::DataPlaneClient;
pub use commit::{CommitCoordinator, CommitDecision};
pub use config::{ClientConfig, CoordinatorConfig, RetryPolicy};
pub use context::CallContext;
pub use coordinator::{Committed, CycleState, TransactionCoordinator};
pub use error::{ApiError, Error, Phase, Result};
pub use factory::TransactionFactory;
pub use memory::MemoryDataPlane;
pub use mutation::{FnMutation, Mutation, NoopMutation, mutation_fn};
pub use observability::{LogFormat, init_logging};
pub use rollback::RollbackAgent;
pub use serializer::ConcurrencySerializer;
pub use staging::{StagedWrite, StagedWrites, WriteMethod};
pub use version::{ConfigurationVersion, VersionOracle};
