//! Caller-supplied cancellation and deadline context.
//!
//! Every network call and every retry sleep runs under a [`CallContext`].
//! Cancelling the token or passing the deadline aborts the in-flight future
//! and surfaces as [`Error::Cancelled`], which the coordinator never retries.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Cancellation and deadline scope for coordinator calls.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Creates a context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Creates a context driven by the given cancellation token.
    #[must_use]
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Returns a copy of this context that expires after `timeout`.
    ///
    /// An existing earlier deadline is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    /// Returns the cancellation token backing this context.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the deadline, if one is set.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns an error if the context is already cancelled or expired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the token fired or the deadline passed.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled("cancelled by caller"));
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Error::cancelled("deadline exceeded"));
        }
        Ok(())
    }

    /// Runs `fut` until it completes, the token fires, or the deadline passes.
    ///
    /// # Errors
    ///
    /// Returns the future's own error, or [`Error::Cancelled`] when aborted.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::cancelled("cancelled by caller")),
            () = deadline => Err(Error::cancelled("deadline exceeded")),
            result = fut => result,
        }
    }

    /// Sleeps for `delay` unless the context is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the sleep is interrupted.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}
