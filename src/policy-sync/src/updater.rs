//! Resource updater capability and an in-memory implementation

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::UpdaterError;
use crate::types::Policy;

/// Outcome of a single updater call
pub type UpdaterResult<T> = std::result::Result<T, UpdaterError>;

/// Per-resource-kind access to the authoritative policy
///
/// Implementations translate these calls into whatever remote protocol the
/// resource speaks and map its failures onto [`UpdaterError`].
#[async_trait]
pub trait ResourceUpdater: Send + Sync {
    /// Fetch the current policy; `None` when the remote has not materialized it yet
    async fn fetch_policy(&self) -> UpdaterResult<Option<Policy>>;

    /// Replace the policy wholesale
    async fn replace_policy(&self, policy: &Policy) -> UpdaterResult<()>;

    /// Stable key used for locking, e.g. `iam-project-{id}`
    fn resource_key(&self) -> String;

    /// Human readable description, used in logs and errors
    fn describe(&self) -> String;
}

/// In-memory updater with optimistic concurrency
///
/// Writes must carry the current version token; a stale token fails with
/// [`UpdaterError::Conflict`]. Each successful write mints a fresh token.
pub struct InMemoryUpdater {
    key: String,
    description: String,
    policy: Arc<RwLock<Option<Policy>>>,
    generation: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryUpdater {
    /// Create an updater holding `policy`
    pub fn new(key: impl Into<String>, policy: Policy) -> Self {
        Self {
            key: key.into(),
            description: String::new(),
            policy: Arc::new(RwLock::new(Some(policy))),
            generation: AtomicU64::new(1),
            writes: AtomicU64::new(0),
        }
    }

    /// Create an updater whose resource does not exist yet
    pub fn empty(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: String::new(),
            policy: Arc::new(RwLock::new(None)),
            generation: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Current stored policy
    pub async fn snapshot(&self) -> Option<Policy> {
        self.policy.read().await.clone()
    }

    /// Number of successful writes
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceUpdater for InMemoryUpdater {
    async fn fetch_policy(&self) -> UpdaterResult<Option<Policy>> {
        Ok(self.policy.read().await.clone())
    }

    async fn replace_policy(&self, policy: &Policy) -> UpdaterResult<()> {
        let mut stored = self.policy.write().await;
        let current_etag = stored.as_ref().map(|p| p.etag.as_str()).unwrap_or_default();
        if current_etag != policy.etag {
            return Err(UpdaterError::Conflict(format!(
                "etag {:?} does not match current {:?}",
                policy.etag, current_etag
            )));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut next = policy.clone();
        next.etag = format!("v{generation}");
        *stored = Some(next);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resource_key(&self) -> String {
        self.key.clone()
    }

    fn describe(&self) -> String {
        if self.description.is_empty() {
            self.key.clone()
        } else {
            self.description.clone()
        }
    }
}
