//! Request batching
//!
//! Submissions for the same resource and key that arrive within the
//! `send_after` window are combined into a single [`PolicyChange::Sequence`]
//! and applied with one read-modify-write. Every submitter of a batch
//! receives the same outcome.
//!
//! Batches are grouped by the updater's resource key together with the
//! caller's key, so a batch only ever holds changes for the resource its
//! updater writes to.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::change::PolicyChange;
use crate::config::BatchingConfig;
use crate::engine::PolicySyncEngine;
use crate::error::{Result, SyncError};
use crate::updater::ResourceUpdater;

struct PendingBatch {
    updater: Arc<dyn ResourceUpdater>,
    changes: Vec<PolicyChange>,
    descriptions: Vec<String>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

/// Resource the batch writes to, plus the caller's grouping key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BatchKey {
    resource_key: String,
    key: String,
}

type PendingBatches = Arc<Mutex<HashMap<BatchKey, PendingBatch>>>;

/// Coalesces policy changes per key before handing them to the engine
pub struct RequestBatcher {
    name: String,
    engine: Arc<PolicySyncEngine>,
    config: BatchingConfig,
    pending: PendingBatches,
}

impl RequestBatcher {
    /// Create a batcher using the engine's batching settings
    pub fn new(name: impl Into<String>, engine: Arc<PolicySyncEngine>) -> Self {
        let config = engine.config().batching.clone();
        Self {
            name: name.into(),
            engine,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether a batch for `key` is waiting to be flushed
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().keys().any(|batch| batch.key == key)
    }

    /// Queue `change` for `key` and wait for the outcome of its batch
    ///
    /// Submissions only share a batch when their updaters report the same
    /// resource key. With batching disabled the change is applied immediately.
    pub async fn submit(
        &self,
        key: &str,
        updater: Arc<dyn ResourceUpdater>,
        change: PolicyChange,
        description: &str,
    ) -> Result<()> {
        if !self.config.enable_batching {
            debug!(batcher = %self.name, key, request = description, "Batching disabled, sending single request");
            return self.engine.apply_mutation(updater.as_ref(), &change).await;
        }

        let resource = updater.describe();
        let batch_key = BatchKey {
            resource_key: updater.resource_key(),
            key: key.to_string(),
        };

        let (tx, rx) = oneshot::channel();
        let schedule = {
            let mut pending = self.pending.lock();
            match pending.get_mut(&batch_key) {
                Some(batch) => {
                    batch.changes.push(change);
                    batch.descriptions.push(description.to_string());
                    batch.waiters.push(tx);
                    false
                }
                None => {
                    pending.insert(
                        batch_key.clone(),
                        PendingBatch {
                            updater,
                            changes: vec![change],
                            descriptions: vec![description.to_string()],
                            waiters: vec![tx],
                        },
                    );
                    true
                }
            }
        };

        if schedule {
            debug!(batcher = %self.name, resource = %resource, key, send_after = ?self.config.send_after, "Scheduling batch");
            self.spawn_flush(batch_key);
        } else {
            debug!(batcher = %self.name, resource = %resource, key, request = description, "Added request to existing batch");
        }

        match tokio::time::timeout(self.config.wait_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SyncError::BatchAborted {
                resource,
                key: key.to_string(),
                description: description.to_string(),
            }),
            Err(_) => Err(SyncError::BatchTimeout {
                resource,
                key: key.to_string(),
                description: description.to_string(),
                timeout: self.config.wait_timeout,
            }),
        }
    }

    fn spawn_flush(&self, batch_key: BatchKey) {
        let pending = Arc::clone(&self.pending);
        let engine = Arc::clone(&self.engine);
        let name = self.name.clone();
        let send_after = self.config.send_after;

        tokio::spawn(async move {
            tokio::time::sleep(send_after).await;
            let batch = pending.lock().remove(&batch_key);
            if let Some(batch) = batch {
                flush(&engine, &name, &batch_key.key, batch).await;
            }
        });
    }
}

async fn flush(engine: &PolicySyncEngine, name: &str, key: &str, batch: PendingBatch) {
    let PendingBatch {
        updater,
        changes,
        descriptions,
        waiters,
    } = batch;
    let count = changes.len();
    info!(batcher = name, key, changes = count, requests = ?descriptions, "Sending batched request");

    let result = engine
        .apply_mutation(updater.as_ref(), &PolicyChange::sequence(changes))
        .await;
    engine.metrics_handle().record_batch(count);

    for waiter in waiters {
        // Submitter gave up waiting
        let _ = waiter.send(result.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::types::{Binding, Policy};
    use crate::updater::{InMemoryUpdater, UpdaterResult};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Updater whose reads bring down the flush task
    struct PanickingUpdater;

    #[async_trait]
    impl ResourceUpdater for PanickingUpdater {
        async fn fetch_policy(&self) -> UpdaterResult<Option<Policy>> {
            panic!("backend client crashed");
        }

        async fn replace_policy(&self, _policy: &Policy) -> UpdaterResult<()> {
            Ok(())
        }

        fn resource_key(&self) -> String {
            "iam-project-crash".to_string()
        }

        fn describe(&self) -> String {
            "project \"crash\"".to_string()
        }
    }

    fn batcher_with(config: SyncConfig) -> RequestBatcher {
        RequestBatcher::new("iam", Arc::new(PolicySyncEngine::new(config)))
    }

    fn viewer_updater() -> Arc<InMemoryUpdater> {
        Arc::new(InMemoryUpdater::new(
            "iam-project-acme",
            Policy::new("v1").with_binding(Binding::new("viewer", ["user:a@x.com"])),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_submissions_share_one_write() {
        let batcher = batcher_with(SyncConfig::default());
        let updater = viewer_updater();
        let handle: Arc<dyn ResourceUpdater> = updater.clone();

        let (first, second) = futures::join!(
            batcher.submit(
                "iam-project-acme",
                Arc::clone(&handle),
                PolicyChange::add_member("viewer", "user:x@x.com"),
                "add x",
            ),
            batcher.submit(
                "iam-project-acme",
                Arc::clone(&handle),
                PolicyChange::add_member("editor", "user:y@x.com"),
                "add y",
            ),
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(updater.writes(), 1);
        let stored = updater.snapshot().await.unwrap();
        assert_eq!(stored.bindings.len(), 2);
        assert!(!batcher.is_pending("iam-project-acme"));

        let metrics = batcher.engine.metrics();
        assert_eq!(metrics.batches_flushed, 1);
        assert_eq!(metrics.batched_changes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_batching_writes_each_change() {
        let mut config = SyncConfig::default();
        config.batching.enable_batching = false;
        let batcher = batcher_with(config);
        let updater = viewer_updater();
        let handle: Arc<dyn ResourceUpdater> = updater.clone();

        for member in ["user:x@x.com", "user:y@x.com"] {
            batcher
                .submit(
                    "iam-project-acme",
                    Arc::clone(&handle),
                    PolicyChange::add_member("viewer", member),
                    member,
                )
                .await
                .unwrap();
        }

        assert_eq!(updater.writes(), 2);
        assert_eq!(batcher.engine.metrics().batches_flushed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout() {
        let mut config = SyncConfig::default();
        config.batching.send_after = Duration::from_secs(60);
        config.batching.wait_timeout = Duration::from_secs(5);
        let batcher = batcher_with(config);
        let handle: Arc<dyn ResourceUpdater> = Arc::new(
            InMemoryUpdater::new("iam-project-acme", Policy::new("v1"))
                .with_description("project \"acme-prod\""),
        );

        let err = batcher
            .submit(
                "iam-project-acme",
                handle,
                PolicyChange::remove_binding("viewer"),
                "drop viewers",
            )
            .await
            .unwrap_err();

        match err {
            SyncError::BatchTimeout {
                resource,
                key,
                description,
                timeout,
            } => {
                assert_eq!(resource, "project \"acme-prod\"");
                assert_eq!(key, "iam-project-acme");
                assert_eq!(description, "drop viewers");
                assert_eq!(timeout, Duration::from_secs(5));
            }
            other => panic!("expected BatchTimeout, got {other:?}"),
        }
        assert!(batcher.is_pending("iam-project-acme"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_key_does_not_mix_resources() {
        let batcher = batcher_with(SyncConfig::default());
        let project_a = Arc::new(InMemoryUpdater::new("iam-project-a", Policy::new("v1")));
        let project_b = Arc::new(InMemoryUpdater::new("iam-project-b", Policy::new("v1")));
        let handle_a: Arc<dyn ResourceUpdater> = project_a.clone();
        let handle_b: Arc<dyn ResourceUpdater> = project_b.clone();

        let (first, second) = futures::join!(
            batcher.submit(
                "shared",
                handle_a,
                PolicyChange::add_member("viewer", "user:x@x.com"),
                "grant x on a",
            ),
            batcher.submit(
                "shared",
                handle_b,
                PolicyChange::add_member("viewer", "user:y@x.com"),
                "grant y on b",
            ),
        );
        first.unwrap();
        second.unwrap();

        let stored_a = project_a.snapshot().await.unwrap();
        let stored_b = project_b.snapshot().await.unwrap();
        assert_eq!(stored_a.bindings, vec![Binding::new("viewer", ["user:x@x.com"])]);
        assert_eq!(stored_b.bindings, vec![Binding::new("viewer", ["user:y@x.com"])]);
        assert_eq!(batcher.engine.metrics().batches_flushed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_flush_aborts_waiters() {
        let batcher = batcher_with(SyncConfig::default());
        let handle: Arc<dyn ResourceUpdater> = Arc::new(PanickingUpdater);

        let err = batcher
            .submit(
                "iam-project-crash",
                handle,
                PolicyChange::add_member("viewer", "user:x@x.com"),
                "add x",
            )
            .await
            .unwrap_err();

        match err {
            SyncError::BatchAborted {
                resource,
                key,
                description,
            } => {
                assert_eq!(resource, "project \"crash\"");
                assert_eq!(key, "iam-project-crash");
                assert_eq!(description, "add x");
            }
            other => panic!("expected BatchAborted, got {other:?}"),
        }
        assert!(!batcher.is_pending("iam-project-crash"));
    }
}
