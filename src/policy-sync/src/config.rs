//! Engine and batching configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Request batching configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Coalesce submissions for the same key; when off every submission runs on its own
    pub enable_batching: bool,

    /// Window during which submissions for one key are collected before a flush
    #[serde(with = "duration_secs")]
    pub send_after: Duration,

    /// How long a submitter waits for its batch outcome
    #[serde(with = "duration_secs")]
    pub wait_timeout: Duration,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enable_batching: true,
            send_after: Duration::from_secs(3),
            wait_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Synchronization engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// First delay of every backoff loop
    #[serde(with = "duration_secs")]
    pub initial_backoff: Duration,

    /// Total time the write loop may spend backing off on conflicts
    #[serde(with = "duration_secs")]
    pub max_conflict_backoff: Duration,

    /// Largest single delay the propagation check will wait
    #[serde(with = "duration_secs")]
    pub max_propagation_backoff: Duration,

    /// Confirmed reads needed before a write counts as propagated
    pub required_confirmations: u32,

    /// Total time a standalone read may spend retrying
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,

    /// Ceiling on a single read-retry or rate-limit delay
    #[serde(with = "duration_secs")]
    pub max_retry_delay: Duration,

    pub batching: BatchingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_conflict_backoff: Duration::from_secs(30),
            max_propagation_backoff: Duration::from_secs(30),
            required_confirmations: 3,
            read_timeout: Duration::from_secs(10 * 60),
            max_retry_delay: Duration::from_secs(30),
            batching: BatchingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `IAM_SYNC_*` environment variables
    ///
    /// Durations are whole seconds. Recognized variables:
    /// `IAM_SYNC_INITIAL_BACKOFF_SECS`, `IAM_SYNC_MAX_CONFLICT_BACKOFF_SECS`,
    /// `IAM_SYNC_MAX_PROPAGATION_BACKOFF_SECS`, `IAM_SYNC_REQUIRED_CONFIRMATIONS`,
    /// `IAM_SYNC_READ_TIMEOUT_SECS`, `IAM_SYNC_MAX_RETRY_DELAY_SECS`,
    /// `IAM_SYNC_ENABLE_BATCHING`, `IAM_SYNC_BATCH_SEND_AFTER_SECS`,
    /// `IAM_SYNC_BATCH_WAIT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`SyncConfig::from_env`] with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |name: &str, target: &mut Duration| -> Result<()> {
            if let Some(raw) = lookup(name) {
                let value: u64 = raw.trim().parse().map_err(|_| {
                    SyncError::InvalidConfig(format!("{name} must be whole seconds, got {raw:?}"))
                })?;
                *target = Duration::from_secs(value);
            }
            Ok(())
        };

        let mut config = Self::default();
        secs("IAM_SYNC_INITIAL_BACKOFF_SECS", &mut config.initial_backoff)?;
        secs("IAM_SYNC_MAX_CONFLICT_BACKOFF_SECS", &mut config.max_conflict_backoff)?;
        secs(
            "IAM_SYNC_MAX_PROPAGATION_BACKOFF_SECS",
            &mut config.max_propagation_backoff,
        )?;
        secs("IAM_SYNC_READ_TIMEOUT_SECS", &mut config.read_timeout)?;
        secs("IAM_SYNC_MAX_RETRY_DELAY_SECS", &mut config.max_retry_delay)?;
        secs("IAM_SYNC_BATCH_SEND_AFTER_SECS", &mut config.batching.send_after)?;
        secs("IAM_SYNC_BATCH_WAIT_TIMEOUT_SECS", &mut config.batching.wait_timeout)?;

        if let Some(raw) = lookup("IAM_SYNC_REQUIRED_CONFIRMATIONS") {
            config.required_confirmations = raw.trim().parse().map_err(|_| {
                SyncError::InvalidConfig(format!(
                    "IAM_SYNC_REQUIRED_CONFIRMATIONS must be a count, got {raw:?}"
                ))
            })?;
        }
        if let Some(raw) = lookup("IAM_SYNC_ENABLE_BATCHING") {
            config.batching.enable_batching = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(SyncError::InvalidConfig(format!(
                        "IAM_SYNC_ENABLE_BATCHING must be a boolean, got {raw:?}"
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which the retry loops could not make progress
    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff.is_zero() {
            return Err(SyncError::InvalidConfig(
                "initial_backoff must be greater than zero".to_string(),
            ));
        }
        if self.required_confirmations == 0 {
            return Err(SyncError::InvalidConfig(
                "required_confirmations must be at least 1".to_string(),
            ));
        }
        if self.max_retry_delay < self.initial_backoff {
            return Err(SyncError::InvalidConfig(
                "max_retry_delay must not be smaller than initial_backoff".to_string(),
            ));
        }
        if self.batching.wait_timeout.is_zero() {
            return Err(SyncError::InvalidConfig(
                "batching.wait_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Durations as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
