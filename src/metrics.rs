//! Process-wide ingestion counters, updated from the run finalizer.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Rolling service-level counters. Shared behind an Arc and updated with
/// atomic adds so concurrent runs never lose an increment.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    total_ingestions: AtomicU64,
    total_records_processed: AtomicU64,
    total_errors: AtomicU64,
    total_processing_ms: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_ingestions: u64,
    pub total_records_processed: u64,
    pub total_errors: u64,
    pub average_processing_ms: u64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed run. The average is derived at snapshot time as
    /// total_processing_ms / total_ingestions.
    pub fn record_run(&self, records_processed: u64, failed: u64, processing_ms: u64) {
        self.total_ingestions.fetch_add(1, Ordering::Relaxed);
        self.total_records_processed
            .fetch_add(records_processed, Ordering::Relaxed);
        self.total_errors.fetch_add(failed, Ordering::Relaxed);
        self.total_processing_ms
            .fetch_add(processing_ms, Ordering::Relaxed);
    }

    /// Record a run that died before finalizing.
    pub fn record_failure(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let ingestions = self.total_ingestions.load(Ordering::Relaxed);
        let total_ms = self.total_processing_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_ingestions: ingestions,
            total_records_processed: self.total_records_processed.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            average_processing_ms: if ingestions == 0 {
                0
            } else {
                total_ms / ingestions
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_mean_over_completed_runs() {
        let metrics = IngestMetrics::new();
        metrics.record_run(10, 0, 100);
        metrics.record_run(5, 2, 300);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_ingestions, 2);
        assert_eq!(snap.total_records_processed, 15);
        assert_eq!(snap.total_errors, 2);
        assert_eq!(snap.average_processing_ms, 200);
    }

    #[test]
    fn empty_metrics_report_zero_average() {
        let snap = IngestMetrics::new().snapshot();
        assert_eq!(snap.total_ingestions, 0);
        assert_eq!(snap.average_processing_ms, 0);
    }

    #[test]
    fn failures_only_move_the_error_counter() {
        let metrics = IngestMetrics::new();
        metrics.record_failure();
        let snap = metrics.snapshot();
        assert_eq!(snap.total_errors, 1);
        assert_eq!(snap.total_ingestions, 0);
    }
}
