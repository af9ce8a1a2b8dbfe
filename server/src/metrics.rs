//! Counters for worker monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Worker metrics.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    /// Ticks executed.
    pub ticks: AtomicU64,
    /// Updates resolved to `Done`.
    pub resolved: AtomicU64,
    /// Rate source failures recorded as `Error`.
    pub provider_failures: AtomicU64,
    /// Storage failures, each aborting a batch.
    pub storage_failures: AtomicU64,
    /// Rows already resolved elsewhere.
    pub skipped: AtomicU64,
}

impl WorkerMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_resolved(&self) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provider_failed(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn storage_failed(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub resolved: u64,
    pub provider_failures: u64,
    pub storage_failures: u64,
    pub skipped: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<WorkerMetrics>;
