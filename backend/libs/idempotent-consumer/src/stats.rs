//! Process-wide processing counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::metrics::ConsumerMetrics;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    /// Events dropped after a store or worker fault
    pub failed: u64,
    pub uptime_seconds: f64,
}

impl StatsSnapshot {
    /// Every received event has exactly one recorded outcome.
    ///
    /// Only meaningful at quiescence (queue drained, no worker mid-protocol).
    pub fn is_balanced(&self) -> bool {
        self.received == self.unique_processed + self.duplicate_dropped + self.failed
    }
}

/// Monotonic counters updated by the worker pool.
///
/// Not persisted: they reset with the process, unlike the dedup store.
pub struct ConsumerStats {
    received: AtomicU64,
    unique_processed: AtomicU64,
    duplicate_dropped: AtomicU64,
    failed: AtomicU64,
    started_at: Instant,
    metrics: Option<ConsumerMetrics>,
}

impl Default for ConsumerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            unique_processed: AtomicU64::new(0),
            duplicate_dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started_at: Instant::now(),
            metrics: None,
        }
    }

    /// Counters that also update Prometheus on every increment.
    pub fn with_metrics(metrics: ConsumerMetrics) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new()
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.received.inc();
        }
    }

    pub fn record_unique(&self) {
        self.unique_processed.fetch_add(1, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.unique_processed.inc();
        }
    }

    pub fn record_duplicate(&self) {
        self.duplicate_dropped.fetch_add(1, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.duplicate_dropped.inc();
        }
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.failed.inc();
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::SeqCst),
            unique_processed: self.unique_processed.load(Ordering::SeqCst),
            duplicate_dropped: self.duplicate_dropped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            uptime_seconds: self.uptime().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_is_a_copy() {
        let stats = ConsumerStats::new();
        stats.record_received();
        let before = stats.snapshot();

        stats.record_received();
        stats.record_unique();

        assert_eq!(before.received, 1);
        assert_eq!(before.unique_processed, 0);
        assert_eq!(stats.snapshot().received, 2);
    }

    #[test]
    fn test_balanced() {
        let stats = ConsumerStats::new();
        for _ in 0..3 {
            stats.record_received();
        }
        stats.record_unique();
        stats.record_duplicate();
        assert!(!stats.snapshot().is_balanced());

        stats.record_failure();
        assert!(stats.snapshot().is_balanced());
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(ConsumerStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_received();
                        stats.record_duplicate();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 8000);
        assert_eq!(snapshot.duplicate_dropped, 8000);
        assert!(snapshot.is_balanced());
    }

    #[test]
    fn test_metrics_mirror_counters() {
        let metrics = ConsumerMetrics::new("stats-unit-test");
        let stats = ConsumerStats::with_metrics(metrics.clone());
        stats.record_received();
        stats.record_unique();

        assert_eq!(metrics.received.get(), 1);
        assert_eq!(metrics.unique_processed.get(), 1);
        assert_eq!(metrics.duplicate_dropped.get(), 0);
    }
}
