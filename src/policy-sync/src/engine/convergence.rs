//! Post-write propagation check
//!
//! The remote store may be eventually consistent, so a successful write does
//! not mean the next read reflects it. After a write the checker re-reads the
//! policy with a growing backoff and replays the (idempotent) change on each
//! copy: when replaying changes nothing, the write is visible. A fixed number
//! of such confirmations is required. They are counted in total, a miss does
//! not reset the count.

use tracing::{debug, warn};

use crate::backoff::{BackoffState, Sleeper};
use crate::change::PolicyChange;
use crate::config::SyncConfig;
use crate::engine::metrics::SyncMetrics;
use crate::error::{Result, SyncError};
use crate::updater::ResourceUpdater;

/// Confirms that a written change has become visible
pub struct ConvergenceChecker<'a> {
    config: &'a SyncConfig,
    sleeper: &'a dyn Sleeper,
    metrics: &'a SyncMetrics,
}

impl<'a> ConvergenceChecker<'a> {
    pub fn new(config: &'a SyncConfig, sleeper: &'a dyn Sleeper, metrics: &'a SyncMetrics) -> Self {
        Self {
            config,
            sleeper,
            metrics,
        }
    }

    /// Wait until `change` is observed the configured number of times
    ///
    /// Rate limiting and empty reads only grow the backoff. Fails with
    /// [`SyncError::PropagationTimeout`] once the next delay would exceed
    /// `max_propagation_backoff`. Returns the number of reads issued.
    pub async fn confirm(
        &self,
        updater: &dyn ResourceUpdater,
        change: &PolicyChange,
        description: &str,
    ) -> Result<u32> {
        let mut backoff = BackoffState::new(self.config.initial_backoff);
        let mut successes = 0;
        let mut reads = 0;

        while successes < self.config.required_confirmations {
            if backoff.delay_exceeds(self.config.max_propagation_backoff) {
                warn!(
                    resource = %description,
                    successes,
                    waited = ?backoff.elapsed(),
                    "Waited too long for propagation"
                );
                return Err(SyncError::PropagationTimeout {
                    resource: description.to_string(),
                });
            }

            let delay = backoff.record_wait();
            self.sleeper.sleep(delay).await;

            debug!(resource = %description, "Retrieving policy to confirm propagation");
            self.metrics.record_read();
            reads += 1;
            let fetched = match updater.fetch_policy().await {
                Ok(fetched) => fetched,
                Err(err) if err.is_rate_limited() => {
                    // Read quota is scarce, back off harder
                    self.metrics.record_rate_limited();
                    warn!(resource = %description, backoff = ?delay, "Rate limited while confirming propagation");
                    backoff.grow();
                    continue;
                }
                Err(err) => {
                    return Err(SyncError::Updater {
                        resource: description.to_string(),
                        source: err,
                    })
                }
            };

            let Some(fetched) = fetched else {
                debug!(resource = %description, "Policy not materialized yet");
                backoff.grow();
                continue;
            };

            let reflected = change.is_reflected_in(&fetched);
            self.metrics.record_propagation_check(reflected);
            if reflected {
                successes += 1;
                debug!(resource = %description, successes, etag = %fetched.etag, "Change observed");
            } else {
                warn!(resource = %description, backoff = ?delay, "Change not observed yet");
                backoff.grow();
            }
        }

        Ok(reads)
    }
}
