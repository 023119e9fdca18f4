//! Retry classification of remote failures.
//!
//! The remote service reports races with other writers through a handful of
//! status code and message combinations:
//!
//! | Code | Message contains                                            | Class                              |
//! |------|-------------------------------------------------------------|------------------------------------|
//! | 409  | `version mismatch`                                          | [`RetryClass::VersionMismatch`]    |
//! | 400  | `transaction does not exist`                                | [`RetryClass::TransactionNotFound`]|
//! | 406  | `transaction` and `is outdated and cannot be committed`     | [`RetryClass::TransactionOutdated`]|
//! | 400  | `version or transaction not specified`                      | [`RetryClass::VersionOrTransactionUnspecified`] |
//!
//! Everything else is [`RetryClass::Fatal`]. A structured [`ApiError`] found
//! anywhere in the source chain decides by code and message; without one the
//! rendered text of the chain is matched by message alone.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Error};

const VERSION_MISMATCH: &str = "version mismatch";
const TRANSACTION_NOT_FOUND: &str = "transaction does not exist";
const TRANSACTION_WORD: &str = "transaction";
const TRANSACTION_OUTDATED: &str = "is outdated and cannot be committed";
const VERSION_OR_TRANSACTION_UNSPECIFIED: &str = "version or transaction not specified";

/// Semantic retry category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    /// The base version moved before the transaction could be created.
    VersionMismatch,
    /// The transaction is unknown to the remote service.
    TransactionNotFound,
    /// The transaction's base version is stale at commit time.
    TransactionOutdated,
    /// The remote service did not receive a version or transaction id.
    VersionOrTransactionUnspecified,
    /// Not a known race; never retried.
    Fatal,
}

impl RetryClass {
    /// Returns true for every class except [`RetryClass::Fatal`].
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Fatal)
    }

    /// Returns the class name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VersionMismatch => "version_mismatch",
            Self::TransactionNotFound => "transaction_not_found",
            Self::TransactionOutdated => "transaction_outdated",
            Self::VersionOrTransactionUnspecified => "version_or_transaction_unspecified",
            Self::Fatal => "fatal",
        }
    }

    /// Classifies a structured `(code, message)` pair.
    #[must_use]
    pub fn from_api(code: u16, message: &str) -> Self {
        match code {
            409 if message.contains(VERSION_MISMATCH) => Self::VersionMismatch,
            400 if message.contains(TRANSACTION_NOT_FOUND) => Self::TransactionNotFound,
            400 if message.contains(VERSION_OR_TRANSACTION_UNSPECIFIED) => {
                Self::VersionOrTransactionUnspecified
            }
            406 if is_outdated(message) => Self::TransactionOutdated,
            _ => Self::Fatal,
        }
    }

    /// Classifies free text by message substrings alone.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        if text.contains(VERSION_MISMATCH) {
            Self::VersionMismatch
        } else if text.contains(TRANSACTION_NOT_FOUND) {
            Self::TransactionNotFound
        } else if is_outdated(text) {
            Self::TransactionOutdated
        } else if text.contains(VERSION_OR_TRANSACTION_UNSPECIFIED) {
            Self::VersionOrTransactionUnspecified
        } else {
            Self::Fatal
        }
    }
}

impl fmt::Display for RetryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ApiError> for RetryClass {
    fn from(err: &ApiError) -> Self {
        Self::from_api(err.code, &err.message)
    }
}

fn is_outdated(message: &str) -> bool {
    message.contains(TRANSACTION_WORD) && message.contains(TRANSACTION_OUTDATED)
}

/// Classifies any error value.
///
/// Walks the source chain looking for a status code first: a structured
/// [`ApiError`] or a raw [`Error::Status`] is matched against the table with
/// its code. A transport-class failure (network, decoding, cancellation)
/// found before one is always fatal. Only errors carrying no code at all
/// fall back to matching the chain's text.
#[must_use]
pub fn classify(err: &(dyn std::error::Error + 'static)) -> RetryClass {
    let mut text = String::new();
    let mut current = Some(err);

    while let Some(e) = current {
        if let Some(api) = e.downcast_ref::<ApiError>() {
            return RetryClass::from(api);
        }
        if !text.is_empty() {
            text.push_str(": ");
        }
        text.push_str(&e.to_string());

        current = match e.downcast_ref::<Error>() {
            Some(Error::Api(api)) => return RetryClass::from(api),
            Some(Error::Status { status, body }) => return RetryClass::from_api(*status, body),
            Some(Error::Transport { .. } | Error::Cancelled { .. }) => return RetryClass::Fatal,
            // Step into the boxed error itself; its `Box` wrapper hides the
            // concrete type from downcasting.
            Some(Error::Context { source, .. } | Error::RetryExhausted { source, .. }) => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => e.source(),
        };
    }

    RetryClass::from_text(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Phase;
    use proptest::prelude::*;

    fn api(code: u16, message: &str) -> Error {
        Error::Api(ApiError::new(code, message))
    }

    #[test]
    fn table_entries_map_to_their_class() {
        let cases = [
            (409, "version mismatch", RetryClass::VersionMismatch),
            (
                400,
                "transaction does not exist",
                RetryClass::TransactionNotFound,
            ),
            (
                406,
                "transaction 3f2a is outdated and cannot be committed",
                RetryClass::TransactionOutdated,
            ),
            (
                400,
                "version or transaction not specified",
                RetryClass::VersionOrTransactionUnspecified,
            ),
        ];
        for (code, message, expected) in cases {
            assert_eq!(classify(&api(code, message)), expected, "{code} {message}");
        }
    }

    #[test]
    fn right_message_with_wrong_code_is_fatal() {
        assert_eq!(classify(&api(500, "version mismatch")), RetryClass::Fatal);
        assert_eq!(
            classify(&api(404, "transaction does not exist")),
            RetryClass::Fatal
        );
        assert_eq!(
            classify(&api(409, "transaction x is outdated and cannot be committed")),
            RetryClass::Fatal
        );
    }

    #[test]
    fn outdated_requires_transaction_word() {
        assert_eq!(
            classify(&api(406, "config is outdated and cannot be committed")),
            RetryClass::Fatal
        );
    }

    #[test]
    fn context_wrappers_are_transparent() {
        let err = api(409, "version mismatch")
            .in_phase(Phase::Create, None)
            .in_phase(Phase::Commit, Some("tx"));
        assert_eq!(classify(&err), RetryClass::VersionMismatch);
    }

    #[test]
    fn raw_status_bodies_are_matched_with_their_code() {
        let outdated = Error::Status {
            status: 406,
            body: "transaction abc is outdated and cannot be committed".to_string(),
        };
        assert_eq!(classify(&outdated), RetryClass::TransactionOutdated);

        let wrong_code = Error::Status {
            status: 500,
            body: "version mismatch".to_string(),
        };
        assert_eq!(classify(&wrong_code), RetryClass::Fatal);
        assert_eq!(
            classify(&wrong_code),
            classify(&api(500, "version mismatch"))
        );

        let wrapped = wrong_code.in_phase(Phase::Create, None);
        assert_eq!(classify(&wrapped), RetryClass::Fatal);
    }

    #[test]
    fn plain_text_errors_fall_back_to_substrings() {
        let io = std::io::Error::other("upstream said: version mismatch");
        assert_eq!(classify(&io), RetryClass::VersionMismatch);
    }

    #[test]
    fn mutation_errors_are_classified_through_their_source() {
        let err = Error::mutation_with_source(
            "staging backend",
            Error::Api(ApiError::new(400, "transaction does not exist")),
        );
        assert_eq!(classify(&err), RetryClass::TransactionNotFound);

        let text_only = Error::mutation("write rejected: version or transaction not specified");
        assert_eq!(
            classify(&text_only),
            RetryClass::VersionOrTransactionUnspecified
        );
    }

    #[test]
    fn transport_failures_are_fatal_even_with_matching_text() {
        let err = Error::transport("proxy reported version mismatch");
        assert_eq!(classify(&err), RetryClass::Fatal);
        assert_eq!(
            classify(&Error::cancelled("cancelled by caller")),
            RetryClass::Fatal
        );
    }

    #[test]
    fn only_fatal_is_not_retryable() {
        assert!(RetryClass::VersionMismatch.is_retryable());
        assert!(RetryClass::TransactionNotFound.is_retryable());
        assert!(RetryClass::TransactionOutdated.is_retryable());
        assert!(RetryClass::VersionOrTransactionUnspecified.is_retryable());
        assert!(!RetryClass::Fatal.is_retryable());
    }

    proptest! {
        #[test]
        fn unknown_messages_are_fatal(code in 100u16..600, message in "[a-z ]{0,40}") {
            prop_assume!(!message.contains("mismatch"));
            prop_assume!(!message.contains("exist"));
            prop_assume!(!message.contains("outdated"));
            prop_assume!(!message.contains("specified"));
            prop_assert_eq!(classify(&api(code, &message)), RetryClass::Fatal);
        }

        #[test]
        fn classification_is_deterministic(code in prop::sample::select(vec![400u16, 406, 409, 500]),
                                           message in prop::sample::select(vec![
                                               "version mismatch",
                                               "transaction does not exist",
                                               "transaction t is outdated and cannot be committed",
                                               "version or transaction not specified",
                                               "boom",
                                           ])) {
            let err = api(code, message);
            let first = classify(&err);
            let _ = classify(&api(409, "version mismatch"));
            prop_assert_eq!(classify(&err), first);
            prop_assert_eq!(first, RetryClass::from_api(code, message));
        }
    }
}
