//! # IAM Policy Synchronization
//!
//! Read-modify-write engine for authorization policies attached to remote
//! resources.
//!
//! ## Features
//!
//! - **Per-resource mutual exclusion** through an injectable lock registry
//! - **Optimistic concurrency** with bounded exponential backoff on conflicts
//! - **Propagation checks** against eventually consistent stores
//! - **Request batching** that coalesces changes to the same resource
//! - **Set algebra** over bindings and audit configs
//!
//! ## Example
//!
//! ```rust
//! use iam_policy_sync::{
//!     Binding, InMemoryUpdater, Policy, PolicyChange, PolicySyncEngine, SyncConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let updater = InMemoryUpdater::new(
//!         "iam-project-acme",
//!         Policy::new("v1").with_binding(Binding::new("roles/viewer", ["user:a@x.com"])),
//!     );
//!
//!     let config = SyncConfig {
//!         required_confirmations: 1,
//!         ..Default::default()
//!     };
//!     let engine = PolicySyncEngine::new(config);
//!     engine
//!         .apply_mutation(&updater, &PolicyChange::add_member("roles/viewer", "user:B@X.com"))
//!         .await?;
//!
//!     let policy = engine.read_policy(&updater).await?;
//!     assert!(policy.bindings[0].members.contains("user:b@x.com"));
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod batch;
pub mod change;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod policy;
pub mod types;
pub mod updater;

// Re-export commonly used types
pub use types::{
    normalize_member, AuditConfig, AuditLogConfig, Binding, Condition, Policy, IAM_POLICY_VERSION,
};
pub use policy::{
    compare_audit_configs, compare_bindings, compare_policies, merge_audit_configs,
    merge_bindings, missing_bindings, subtract_bindings,
};
pub use change::PolicyChange;
pub use updater::{InMemoryUpdater, ResourceUpdater, UpdaterResult};
pub use lock::MutexRegistry;
pub use backoff::{BackoffState, Sleeper, TokioSleeper};
pub use engine::{ConvergenceChecker, PolicySyncEngine, SyncMetrics, SyncMetricsSnapshot};
pub use batch::RequestBatcher;
pub use config::{BatchingConfig, SyncConfig};
pub use error::{Result, SyncError, UpdaterError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
