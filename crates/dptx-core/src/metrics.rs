//! Metric names and recording helpers for transaction coordination.
//!
//! The library only emits through the `metrics` facade; installing a recorder
//! (Prometheus or otherwise) is left to the embedding process.

use std::sync::OnceLock;

use metrics::{counter, describe_counter};

use crate::classify::RetryClass;
use crate::error::Phase;

/// Transactions opened on the remote service.
pub const TRANSACTIONS_CREATED_TOTAL: &str = "dptx_transactions_created_total";

/// Commit attempts by outcome.
pub const COMMITS_TOTAL: &str = "dptx_commits_total";

/// Retries by phase and retry class.
pub const RETRIES_TOTAL: &str = "dptx_retries_total";

/// Rollbacks by outcome.
pub const ROLLBACKS_TOTAL: &str = "dptx_rollbacks_total";

/// Whole cycles by outcome.
pub const CYCLES_TOTAL: &str = "dptx_cycles_total";

static METRICS_REGISTERED: OnceLock<()> = OnceLock::new();

/// Registers metric descriptions.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn register_metrics() {
    METRICS_REGISTERED.get_or_init(|| {
        describe_counter!(
            TRANSACTIONS_CREATED_TOTAL,
            "Total number of transactions opened"
        );
        describe_counter!(COMMITS_TOTAL, "Total number of commit attempts by outcome");
        describe_counter!(RETRIES_TOTAL, "Total number of retries by phase and class");
        describe_counter!(ROLLBACKS_TOTAL, "Total number of rollbacks by outcome");
        describe_counter!(CYCLES_TOTAL, "Total number of transaction cycles by outcome");
    });
}

pub(crate) fn record_transaction_created() {
    counter!(TRANSACTIONS_CREATED_TOTAL).increment(1);
}

pub(crate) fn record_commit(outcome: &'static str) {
    counter!(COMMITS_TOTAL, "outcome" => outcome).increment(1);
}

pub(crate) fn record_retry(phase: Phase, class: RetryClass) {
    counter!(
        RETRIES_TOTAL,
        "phase" => phase.as_str(),
        "class" => class.as_str()
    )
    .increment(1);
}

pub(crate) fn record_rollback(outcome: &'static str) {
    counter!(ROLLBACKS_TOTAL, "outcome" => outcome).increment(1);
}

pub(crate) fn record_cycle(outcome: &'static str) {
    counter!(CYCLES_TOTAL, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        register_metrics();
        register_metrics();
        record_transaction_created();
        record_commit("committed");
        record_retry(Phase::Create, RetryClass::VersionMismatch);
        record_rollback("deleted");
        record_cycle("restarted");
    }
}
