//! Tracing setup for processes that embed the coordinator.
//!
//! Every coordinated operation runs inside a `transaction` span. The span
//! carries a ULID `operation_id` from the start. It gains the
//! `transaction_id` once the remote service has opened a transaction, so
//! retries, restarts and rollbacks of one operation share a single
//! correlation key in the logs.

use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;

static INIT: Once = Once::new();

/// Filter applied when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human-readable events.
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(Error::InvalidInput(format!(
                "unknown log format {other:?}, expected json or pretty"
            ))),
        }
    }
}

/// Installs the global subscriber with an `EnvFilter` read from `RUST_LOG`.
///
/// Only the first call has any effect. A subscriber that another component
/// already installed is left in place.
///
/// ```rust
/// use dptx_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Json);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let registry = tracing_subscriber::registry().with(filter);
        let installed = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };
        if installed.is_err() {
            tracing::debug!("global subscriber already set; keeping it");
        }
    });
}

/// Opens the span wrapping one coordinated operation.
///
/// `transaction_id` is declared empty; record it when a transaction opens:
///
/// ```rust
/// use dptx_core::observability::transaction_span;
///
/// let span = transaction_span("execute", "01J0000000000000000000000");
/// span.record("transaction_id", "tx-1");
/// ```
#[must_use]
pub fn transaction_span(operation: &str, operation_id: &str) -> Span {
    tracing::info_span!(
        "transaction",
        op = operation,
        operation_id = operation_id,
        transaction_id = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().expect("json"), LogFormat::Json);
        assert_eq!(" text ".parse::<LogFormat>().expect("text"), LogFormat::Pretty);
        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{err}");
    }

    #[test]
    fn span_accepts_transaction_id_later() {
        let span = transaction_span("execute", "op-1");
        span.record("transaction_id", "tx-1");
        let _guard = span.enter();
        tracing::info!("inside transaction span");
    }
}
