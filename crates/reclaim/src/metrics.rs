use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking reclaim outcomes.
///
/// Relaxed ordering throughout; use [`snapshot`](Self::snapshot) for a
/// reportable view.
#[derive(Debug, Default)]
pub struct ReclaimMetrics {
    /// Uploads deleted by an expiry timer.
    pub timer_deletions: AtomicU64,
    /// Timers that fired after the upload was already gone.
    pub timer_noops: AtomicU64,
    /// Timers whose delete failed or timed out.
    pub timer_failures: AtomicU64,
    /// Completed sweeps.
    pub sweep_runs: AtomicU64,
    /// Uploads deleted by sweeps.
    pub sweep_deletions: AtomicU64,
    /// Per-record sweep failures.
    pub sweep_errors: AtomicU64,
    /// Sweeps aborted because the store could not be listed.
    pub sweep_fatal: AtomicU64,
}

/// Point-in-time copy of [`ReclaimMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimMetricsSnapshot {
    pub timer_deletions: u64,
    pub timer_noops: u64,
    pub timer_failures: u64,
    pub sweep_runs: u64,
    pub sweep_deletions: u64,
    pub sweep_errors: u64,
    pub sweep_fatal: u64,
}

impl ReclaimMetrics {
    pub fn increment_timer_deletions(&self) {
        self.timer_deletions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timer_noops(&self) {
        self.timer_noops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timer_failures(&self) {
        self.timer_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sweep_fatal(&self) {
        self.sweep_fatal.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold the totals of one completed sweep into the counters.
    pub fn record_sweep(&self, deleted: u64, errors: u64) {
        self.sweep_runs.fetch_add(1, Ordering::Relaxed);
        self.sweep_deletions.fetch_add(deleted, Ordering::Relaxed);
        self.sweep_errors.fetch_add(errors, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> ReclaimMetricsSnapshot {
        ReclaimMetricsSnapshot {
            timer_deletions: self.timer_deletions.load(Ordering::Relaxed),
            timer_noops: self.timer_noops.load(Ordering::Relaxed),
            timer_failures: self.timer_failures.load(Ordering::Relaxed),
            sweep_runs: self.sweep_runs.load(Ordering::Relaxed),
            sweep_deletions: self.sweep_deletions.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
            sweep_fatal: self.sweep_fatal.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = ReclaimMetrics::default();
        metrics.increment_timer_deletions();
        metrics.increment_timer_noops();
        metrics.increment_timer_noops();
        metrics.record_sweep(3, 1);
        metrics.record_sweep(0, 0);

        let snap = metrics.snapshot();
        assert_eq!(snap.timer_deletions, 1);
        assert_eq!(snap.timer_noops, 2);
        assert_eq!(snap.sweep_runs, 2);
        assert_eq!(snap.sweep_deletions, 3);
        assert_eq!(snap.sweep_errors, 1);
        assert_eq!(snap.sweep_fatal, 0);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let json = serde_json::to_value(ReclaimMetrics::default().snapshot()).unwrap();
        assert_eq!(json["sweepRuns"], 0);
        assert_eq!(json["timerFailures"], 0);
    }
}
