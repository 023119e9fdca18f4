//! Opening transactions against a base version.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{Transaction, TransactionApi};
use crate::classify::{RetryClass, classify};
use crate::config::{DEFAULT_CREATE_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_MS};
use crate::context::CallContext;
use crate::error::{Error, Phase, Result};
use crate::metrics;
use crate::version::{ConfigurationVersion, VersionOracle};

/// Creates transactions, healing version races by re-reading the version.
#[derive(Clone)]
pub struct TransactionFactory {
    api: Arc<dyn TransactionApi>,
    oracle: VersionOracle,
    max_attempts: u32,
    retry_delay: Duration,
}

impl TransactionFactory {
    /// Creates a factory with the default attempt bound and delay.
    #[must_use]
    pub fn new(api: Arc<dyn TransactionApi>) -> Self {
        Self {
            oracle: VersionOracle::new(Arc::clone(&api)),
            api,
            max_attempts: DEFAULT_CREATE_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }

    /// Sets the attempt bound (at least one attempt is always made).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Returns the oracle used for version refreshes.
    #[must_use]
    pub fn oracle(&self) -> &VersionOracle {
        &self.oracle
    }

    /// Opens a transaction bound to `base_version`.
    ///
    /// Only [`RetryClass::VersionMismatch`] is retried: the version is read
    /// again and creation repeated with the fresh value after a fixed delay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetryExhausted`] when every attempt hit a version
    /// mismatch, a `version_read` error if a refresh fails, and any other
    /// create failure wrapped with `create` context.
    pub async fn create(
        &self,
        ctx: &CallContext,
        base_version: ConfigurationVersion,
    ) -> Result<Transaction> {
        let mut version = base_version;
        let mut attempt = 1;

        loop {
            let err = match self.api.create_transaction(ctx, &version).await {
                Ok(transaction) => {
                    metrics::record_transaction_created();
                    tracing::debug!(
                        transaction_id = %transaction.id,
                        base_version = %transaction.base_version,
                        attempt,
                        "opened transaction"
                    );
                    return Ok(transaction);
                }
                Err(err) => err,
            };

            let class = classify(&err);
            if class != RetryClass::VersionMismatch {
                return Err(err.in_phase(Phase::Create, None));
            }
            if attempt >= self.max_attempts {
                return Err(Error::RetryExhausted {
                    phase: Phase::Create,
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            metrics::record_retry(Phase::Create, class);
            tracing::warn!(
                base_version = %version,
                attempt,
                max_attempts = self.max_attempts,
                error = %err,
                "version mismatch while opening transaction; refreshing version"
            );

            ctx.sleep(self.retry_delay).await?;
            version = self.oracle.current_version(ctx).await?;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Fault, MemoryDataPlane, Operation};

    fn factory(plane: &MemoryDataPlane) -> TransactionFactory {
        TransactionFactory::new(Arc::new(plane.clone())).with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn mismatch_refreshes_the_version_exactly_once() {
        let plane = MemoryDataPlane::with_version(7);
        let stale = ConfigurationVersion::from(6);

        let tx = factory(&plane)
            .create(&CallContext::background(), stale)
            .await
            .expect("created against refreshed version");

        assert_eq!(tx.base_version.as_str(), "7");
        assert_eq!(plane.calls(Operation::Create).expect("calls"), 2);
        assert_eq!(plane.calls(Operation::VersionRead).expect("calls"), 1);
    }

    #[tokio::test]
    async fn persistent_mismatch_exhausts_attempts() {
        let plane = MemoryDataPlane::new();
        for _ in 0..3 {
            plane
                .inject(Operation::Create, Fault::api(409, "version mismatch"))
                .expect("inject");
        }

        let err = factory(&plane)
            .create(&CallContext::background(), ConfigurationVersion::from(1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::RetryExhausted {
                phase: Phase::Create,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(plane.calls(Operation::VersionRead).expect("calls"), 2);
    }

    #[tokio::test]
    async fn other_classes_are_not_retried() {
        let plane = MemoryDataPlane::new();
        plane
            .inject(
                Operation::Create,
                Fault::api(400, "version or transaction not specified"),
            )
            .expect("inject");

        let err = factory(&plane)
            .create(&CallContext::background(), ConfigurationVersion::from(1))
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Create));
        assert_eq!(plane.calls(Operation::Create).expect("calls"), 1);
        assert_eq!(plane.calls(Operation::VersionRead).expect("calls"), 0);
    }
}
