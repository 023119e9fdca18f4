//! Critical section around "read version, then create transaction".

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

/// Serializes version reads with transaction creation.
///
/// Each coordinator owns one unless constructed with a shared instance;
/// independent coordinators therefore never block each other. The lock is
/// held only while a base version is read and bound to a new transaction,
/// never across the mutation or the commit.
#[derive(Debug, Default)]
pub struct ConcurrencySerializer {
    lock: Mutex<()>,
}

/// Proof that the holder is inside the critical section.
#[derive(Debug)]
pub struct SerializerGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl ConcurrencySerializer {
    /// Creates a new serializer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a serializer meant to be shared between coordinators.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Waits for and enters the critical section.
    pub async fn enter(&self) -> SerializerGuard<'_> {
        SerializerGuard {
            _guard: self.lock.lock().await,
        }
    }

    /// Returns true if some caller currently holds the critical section.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}
