//! Custom assertion helpers for integration tests.

use crate::stub::{Endpoint, RequestRecord, StubDataPlane, TransactionStatus};

/// Asserts that the request log, restricted to the given endpoints, matches
/// `expected` exactly.
///
/// # Panics
///
/// Panics if the filtered sequence differs.
pub fn assert_endpoint_sequence(requests: &[RequestRecord], expected: &[Endpoint]) {
    let actual: Vec<Endpoint> = requests
        .iter()
        .map(|r| r.endpoint)
        .filter(|e| expected.contains(e))
        .collect();
    assert_eq!(
        actual, expected,
        "Unexpected endpoint sequence; full log: {requests:?}"
    );
}

/// Asserts that a transaction was created but never committed.
///
/// # Panics
///
/// Panics if the transaction is unknown or committed.
pub fn assert_never_committed(stub: &StubDataPlane, transaction_id: &str) {
    let status = stub.transaction_status(transaction_id);
    assert!(
        status.is_some(),
        "Transaction {transaction_id} was never created"
    );
    assert_ne!(
        status,
        Some(TransactionStatus::Committed),
        "Transaction {transaction_id} was committed"
    );
}

/// Asserts that every staged write carried the given transaction id.
///
/// # Panics
///
/// Panics if a staged write targeted another transaction or none.
pub fn assert_writes_scoped_to(requests: &[RequestRecord], transaction_id: &str) {
    for request in requests.iter().filter(|r| r.endpoint == Endpoint::Stage) {
        assert_eq!(
            request.transaction_id(),
            Some(transaction_id),
            "Staged write {} {} not scoped to {transaction_id}",
            request.method,
            request.path
        );
    }
}

/// Asserts that the ids are pairwise distinct.
///
/// # Panics
///
/// Panics on the first duplicate.
pub fn assert_distinct_ids(ids: &[String]) {
    for (i, id) in ids.iter().enumerate() {
        assert!(
            !ids[i + 1..].contains(id),
            "Transaction id {id} was reused in {ids:?}"
        );
    }
}
