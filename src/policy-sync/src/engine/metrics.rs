//! Counters for engine observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMetricsSnapshot {
    /// Policy fetches issued (all phases)
    pub reads: u64,

    /// Successful policy writes
    pub writes: u64,

    /// Write attempts restarted after a conflict
    pub conflict_retries: u64,

    /// Waits caused by rate limiting
    pub rate_limited_retries: u64,

    /// Write attempts restarted after a principal vanished
    pub principal_not_found_retries: u64,

    /// Reads issued while confirming propagation
    pub propagation_checks: u64,

    /// Confirmation reads that did not yet reflect the write
    pub propagation_misses: u64,

    /// Invocations that surfaced an error
    pub failures: u64,

    /// Batches flushed by the batcher
    pub batches_flushed: u64,

    /// Changes carried by flushed batches
    pub batched_changes: u64,
}

impl SyncMetricsSnapshot {
    /// Share of confirmation reads that already reflected the write
    pub fn propagation_hit_rate(&self) -> f64 {
        if self.propagation_checks == 0 {
            0.0
        } else {
            (self.propagation_checks - self.propagation_misses) as f64
                / self.propagation_checks as f64
        }
    }
}

/// Lock-free counters shared by the engine and the batcher
#[derive(Debug, Default)]
pub struct SyncMetrics {
    reads: AtomicU64,
    writes: AtomicU64,
    conflict_retries: AtomicU64,
    rate_limited_retries: AtomicU64,
    principal_not_found_retries: AtomicU64,
    propagation_checks: AtomicU64,
    propagation_misses: AtomicU64,
    failures: AtomicU64,
    batches_flushed: AtomicU64,
    batched_changes: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict_retry(&self) {
        self.conflict_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_principal_not_found_retry(&self) {
        self.principal_not_found_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one confirmation read and whether it reflected the write
    pub fn record_propagation_check(&self, reflected: bool) {
        self.propagation_checks.fetch_add(1, Ordering::Relaxed);
        if !reflected {
            self.propagation_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, changes: usize) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.batched_changes.fetch_add(changes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            conflict_retries: self.conflict_retries.load(Ordering::Relaxed),
            rate_limited_retries: self.rate_limited_retries.load(Ordering::Relaxed),
            principal_not_found_retries: self.principal_not_found_retries.load(Ordering::Relaxed),
            propagation_checks: self.propagation_checks.load(Ordering::Relaxed),
            propagation_misses: self.propagation_misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batched_changes: self.batched_changes.load(Ordering::Relaxed),
        }
    }
}
