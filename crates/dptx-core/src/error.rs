//! Error types and result aliases for dptx.
//!
//! Every failure surfaced by the coordinator is an [`Error`]. Remote
//! rejections that carry a structured body become [`ApiError`]; everything
//! the remote service returns without one becomes [`Error::Status`]. The
//! [`classify`](crate::classify) module maps any of these onto a
//! [`RetryClass`](crate::classify::RetryClass).

use std::fmt;

use serde::{Deserialize, Serialize};

/// The result type used throughout dptx.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error accepted from mutation functions and transport layers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The step of a transaction cycle an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Reading the current configuration version.
    VersionRead,
    /// Opening a transaction against a base version.
    Create,
    /// Running the caller's mutation inside a transaction.
    Mutate,
    /// Committing a transaction.
    Commit,
    /// Deleting an uncommitted transaction.
    Rollback,
}

impl Phase {
    /// Returns the phase name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VersionRead => "version_read",
            Self::Create => "create",
            Self::Mutate => "mutate",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured rejection returned by the remote service.
///
/// Decoded from a `{"code": int, "message": string}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("API error {code}: {message}")]
pub struct ApiError {
    /// Status code reported in the body (or the HTTP status when absent).
    pub code: u16,
    /// Human-readable message from the remote service.
    pub message: String,
}

impl ApiError {
    /// Creates a new API error.
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors that can occur while coordinating transactions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A network or decoding failure. Never retried by the coordinator.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The caller cancelled the operation or its deadline passed.
    #[error("transport error: operation cancelled ({reason})")]
    Cancelled {
        /// Why the operation stopped.
        reason: String,
    },

    /// A response body could not be interpreted.
    #[error("parse error: {message}")]
    Parse {
        /// Description of the parse failure.
        message: String,
    },

    /// The remote service rejected the request with a structured body.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The remote service returned an unexpected status without a structured body.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// A bounded retry loop ran out of attempts.
    #[error("{phase} retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        /// The phase that was being retried.
        phase: Phase,
        /// Number of attempts made.
        attempts: u32,
        /// The last error observed.
        #[source]
        source: Box<Error>,
    },

    /// The caller's mutation function failed.
    #[error("mutation failed: {message}")]
    Mutation {
        /// Description of the mutation failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// An error annotated with the phase and transaction it occurred in.
    #[error("{phase} failed{}: {source}", transaction_suffix(.transaction_id.as_deref()))]
    Context {
        /// The phase the error occurred in.
        phase: Phase,
        /// The transaction involved, if one had been opened.
        transaction_id: Option<String>,
        /// The wrapped error.
        #[source]
        source: Box<Error>,
    },

    /// Invalid input or configuration was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

fn transaction_suffix(transaction_id: Option<&str>) -> String {
    transaction_id.map_or_else(String::new, |id| format!(" for transaction {id}"))
}

impl Error {
    /// Creates a new transport error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new transport error with a source cause.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new parse error.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a new cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates a mutation failure with the given message.
    #[must_use]
    pub fn mutation(message: impl Into<String>) -> Self {
        Self::Mutation {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a mutation failure wrapping an arbitrary error.
    #[must_use]
    pub fn mutation_with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Mutation {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Wraps this error with phase and transaction context.
    #[must_use]
    pub fn in_phase(self, phase: Phase, transaction_id: Option<&str>) -> Self {
        Self::Context {
            phase,
            transaction_id: transaction_id.map(str::to_string),
            source: Box::new(self),
        }
    }

    /// Returns true for transport-class failures, including cancellation.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Cancelled { .. } => true,
            Self::Context { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// Returns true when the caller cancelled the operation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Context { source, .. } | Self::RetryExhausted { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// Returns the structured API error this error wraps, if any.
    #[must_use]
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(api) => Some(api),
            Self::Context { source, .. } | Self::RetryExhausted { source, .. } => {
                source.api_error()
            }
            _ => None,
        }
    }

    /// Returns the phase recorded on the outermost context wrapper, if any.
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Context { phase, .. } | Self::RetryExhausted { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}
