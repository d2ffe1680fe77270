//! Per-resource mutual exclusion
//!
//! A process-local map from resource key to an async mutex. Entries are
//! created lazily and never removed, so the map grows with the number of
//! distinct resources touched. There is no cross-process guarantee.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Registry of per-key locks
///
/// Passed into the engine rather than held globally, so tests can use an
/// isolated instance.
#[derive(Debug, Default)]
pub struct MutexRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MutexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Wait for the lock on `key`; it is released when the guard drops
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        trace!(key, "Locking");
        let guard = self.mutex_for(key).lock_owned().await;
        trace!(key, "Locked");
        guard
    }

    /// Run `body` while holding the lock on `key`
    ///
    /// The lock is released on every exit path, including errors and
    /// unwinding, since the guard lives on this future's stack.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.lock(key).await;
        body().await
    }

    /// Whether some caller currently holds the lock on `key`
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .map(|m| m.value().try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of keys seen so far
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
