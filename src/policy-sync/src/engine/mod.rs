//! Read-modify-write engine for remote policies
//!
//! Orchestrates locking, fetching, applying a [`PolicyChange`], writing and
//! confirming propagation, with backoff on rate limiting and conflicts.
//!
//! # Architecture
//!
//! ```text
//! lock ─→ Fetching ─→ Modifying ─→ Writing ─→ Confirming ─→ Done
//!            ↑                        │            │
//!            └──── conflict / ────────┘            │
//!                  principal gone                  │
//!                                  PropagationTimeout
//! ```

pub mod convergence;
pub mod metrics;

pub use convergence::ConvergenceChecker;
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backoff::{BackoffState, Sleeper, TokioSleeper};
use crate::change::PolicyChange;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError, UpdaterError};
use crate::lock::MutexRegistry;
use crate::policy::debug_print_bindings;
use crate::types::Policy;
use crate::updater::ResourceUpdater;

/// Policy synchronization engine
///
/// Serializes every read and read-modify-write per resource key through its
/// [`MutexRegistry`]. Owns no network code: all remote access goes through the
/// supplied [`ResourceUpdater`].
pub struct PolicySyncEngine {
    config: SyncConfig,
    locks: Arc<MutexRegistry>,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<SyncMetrics>,
}

impl PolicySyncEngine {
    /// Create an engine with its own lock registry, sleeping on the tokio timer
    pub fn new(config: SyncConfig) -> Self {
        info!(
            confirmations = config.required_confirmations,
            conflict_budget = ?config.max_conflict_backoff,
            "PolicySyncEngine initialized"
        );
        Self {
            config,
            locks: Arc::new(MutexRegistry::new()),
            sleeper: Arc::new(TokioSleeper),
            metrics: Arc::new(SyncMetrics::new()),
        }
    }

    /// Share a lock registry with other engines in the process
    pub fn with_registry(mut self, locks: Arc<MutexRegistry>) -> Self {
        self.locks = locks;
        self
    }

    /// Replace the sleep implementation
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn locks(&self) -> &Arc<MutexRegistry> {
        &self.locks
    }

    pub(crate) fn metrics_handle(&self) -> &SyncMetrics {
        &self.metrics
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Read the policy under the resource lock, retrying transient failures
    ///
    /// A resource that does not exist yet reads as an empty policy.
    pub async fn read_policy(&self, updater: &dyn ResourceUpdater) -> Result<Policy> {
        let description = updater.describe();
        let _guard = self.locks.lock(&updater.resource_key()).await;

        debug!(resource = %description, "Retrieving policy");
        let policy = self.fetch_with_retry(updater, &description).await?;
        debug!(
            resource = %description,
            etag = %policy.etag,
            bindings = %debug_print_bindings(&policy.bindings),
            "Retrieved policy"
        );
        Ok(policy)
    }

    /// Apply `change` to the resource's policy and wait until it is visible
    pub async fn apply_mutation(
        &self,
        updater: &dyn ResourceUpdater,
        change: &PolicyChange,
    ) -> Result<()> {
        let description = updater.describe();
        let _guard = self.locks.lock(&updater.resource_key()).await;

        let result = self.read_modify_write(updater, change, &description).await;
        match &result {
            Ok(()) => info!(resource = %description, "Set policy"),
            Err(err) => {
                self.metrics.record_failure();
                error!(resource = %description, error = %err, "Not retrying IAM policy change");
            }
        }
        result
    }

    /// Body of [`apply_mutation`](Self::apply_mutation); caller holds the lock
    async fn read_modify_write(
        &self,
        updater: &dyn ResourceUpdater,
        change: &PolicyChange,
        description: &str,
    ) -> Result<()> {
        let mut backoff = BackoffState::new(self.config.initial_backoff);

        loop {
            let policy = self.fetch_for_write(updater, description).await?;
            debug!(resource = %description, etag = %policy.etag, "Retrieved policy");

            let modified = change.applied_to(&policy);

            debug!(
                resource = %description,
                bindings = %debug_print_bindings(&modified.bindings),
                "Setting policy"
            );
            let err = match updater.replace_policy(&modified).await {
                Ok(()) => {
                    self.metrics.record_write();
                    ConvergenceChecker::new(&self.config, self.sleeper.as_ref(), &self.metrics)
                        .confirm(updater, change, description)
                        .await?;
                    return Ok(());
                }
                Err(err) => err,
            };

            if err.is_conflict() {
                self.wait_before_retry(&mut backoff, err, description).await?;
                self.metrics.record_conflict_retry();
                continue;
            }

            // A member deleted out of band makes the write fail. If the policy
            // moved on since our read there is a new state worth trying.
            if err.is_principal_not_found() {
                match self.fetch_with_retry(updater, description).await {
                    Ok(current) if current.etag != policy.etag => {
                        info!(resource = %description, "Current and old etag did not match, retrying");
                        self.wait_before_retry(&mut backoff, err, description).await?;
                        self.metrics.record_principal_not_found_retry();
                        continue;
                    }
                    Ok(_) => {
                        debug!(resource = %description, "Current and old etag matched, not retrying");
                    }
                    Err(read_err) => {
                        debug!(resource = %description, error = %read_err, "Error checking etag");
                    }
                }
            }

            return Err(SyncError::Updater {
                resource: description.to_string(),
                source: err,
            });
        }
    }

    /// Sleep before another write attempt, or give up once the budget is spent
    async fn wait_before_retry(
        &self,
        backoff: &mut BackoffState,
        err: UpdaterError,
        description: &str,
    ) -> Result<()> {
        if backoff.would_exceed(self.config.max_conflict_backoff) {
            return Err(SyncError::TooManyConflicts {
                resource: description.to_string(),
                source: err,
            });
        }
        let delay = backoff.record_wait();
        warn!(
            resource = %description,
            backoff = ?delay,
            error = %err,
            "Concurrent policy changes, restarting read-modify-write"
        );
        self.sleeper.sleep(delay).await;
        backoff.grow();
        Ok(())
    }

    /// Fetch for the write loop: rate limiting is waited out, anything else aborts
    async fn fetch_for_write(
        &self,
        updater: &dyn ResourceUpdater,
        description: &str,
    ) -> Result<Policy> {
        let mut backoff =
            BackoffState::new(self.config.initial_backoff).with_max_delay(self.config.max_retry_delay);

        loop {
            debug!(resource = %description, "Retrieving policy");
            self.metrics.record_read();
            match updater.fetch_policy().await {
                Ok(policy) => return Ok(policy.unwrap_or_default()),
                Err(err) if err.is_rate_limited() => {
                    let delay = backoff.record_wait();
                    self.metrics.record_rate_limited();
                    warn!(
                        resource = %description,
                        backoff = ?delay,
                        "Rate limited while reading policy, waiting before attempting again"
                    );
                    self.sleeper.sleep(delay).await;
                    backoff.grow();
                }
                Err(err) => {
                    return Err(SyncError::Updater {
                        resource: description.to_string(),
                        source: err,
                    })
                }
            }
        }
    }

    /// Fetch with bounded retries on transient errors; caller holds the lock
    async fn fetch_with_retry(
        &self,
        updater: &dyn ResourceUpdater,
        description: &str,
    ) -> Result<Policy> {
        let mut backoff =
            BackoffState::new(self.config.initial_backoff).with_max_delay(self.config.max_retry_delay);

        loop {
            self.metrics.record_read();
            let err = match updater.fetch_policy().await {
                Ok(policy) => return Ok(policy.unwrap_or_default()),
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(SyncError::Updater {
                    resource: description.to_string(),
                    source: err,
                });
            }
            if backoff.would_exceed(self.config.read_timeout) {
                return Err(SyncError::ReadTimeout {
                    resource: description.to_string(),
                    elapsed: backoff.elapsed(),
                    source: err,
                });
            }
            if err.is_rate_limited() {
                self.metrics.record_rate_limited();
            }

            let delay = backoff.record_wait();
            debug!(resource = %description, backoff = ?delay, error = %err, "Retrying policy read");
            self.sleeper.sleep(delay).await;
            backoff.grow();
        }
    }
}
