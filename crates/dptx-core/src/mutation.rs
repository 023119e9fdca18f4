//! The caller-supplied work performed inside a transaction.

use std::future::Future;

use async_trait::async_trait;

use crate::api::Transaction;
use crate::context::CallContext;
use crate::error::Result;

/// Work staged inside a transaction before it is committed.
///
/// The coordinator may call [`Mutation::apply`] more than once for a single
/// operation: every whole-cycle restart opens a fresh transaction and applies
/// the mutation again. Implementations must therefore only stage writes
/// scoped by the transaction they are given.
///
/// A failure is classified like any other error; a retryable class restarts
/// the cycle, anything else is returned to the caller after rollback.
#[async_trait]
pub trait Mutation: Send + Sync {
    /// Value produced by a successful application.
    type Output: Send;

    /// Stages writes inside `transaction`.
    async fn apply(&self, ctx: &CallContext, transaction: &Transaction) -> Result<Self::Output>;
}

/// Adapter turning a closure into a [`Mutation`].
pub struct FnMutation<F> {
    f: F,
}

/// Wraps a closure returning a future as a [`Mutation`].
///
/// The closure receives owned copies of the context and transaction so the
/// returned future can be `'static`.
pub fn mutation_fn<F, Fut, T>(f: F) -> FnMutation<F>
where
    F: Fn(CallContext, Transaction) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    FnMutation { f }
}

#[async_trait]
impl<F, Fut, T> Mutation for FnMutation<F>
where
    F: Fn(CallContext, Transaction) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    type Output = T;

    async fn apply(&self, ctx: &CallContext, transaction: &Transaction) -> Result<T> {
        (self.f)(ctx.clone(), transaction.clone()).await
    }
}

/// A mutation that stages nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMutation;

#[async_trait]
impl Mutation for NoopMutation {
    type Output = ();

    async fn apply(&self, _ctx: &CallContext, _transaction: &Transaction) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::version::ConfigurationVersion;

    #[tokio::test]
    async fn closure_receives_the_transaction() {
        let mutation = mutation_fn(|_ctx, tx: Transaction| async move { Ok::<_, Error>(tx.id) });
        let tx = Transaction::new("tx-7", ConfigurationVersion::from(3));
        let out = mutation
            .apply(&CallContext::background(), &tx)
            .await
            .expect("applies");
        assert_eq!(out, "tx-7");
    }

    #[tokio::test]
    async fn closure_errors_propagate() {
        let mutation = mutation_fn(|_ctx, _tx| async { Err::<(), _>(Error::mutation("nope")) });
        let tx = Transaction::new("tx-8", ConfigurationVersion::from(3));
        let err = mutation
            .apply(&CallContext::background(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Mutation { .. }));
    }
}
