//! Lock-free acquisition metrics and periodic reporting
//!
//! Counters are updated from the sampling loop and read by the reporter task.
//! All atomics use Relaxed ordering; these are statistics only.

use crate::io::sink::SinkKind;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Cycle duration bucket boundaries (microseconds)
const BUCKET_BOUNDS: [u64; 10] = [500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000];
const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(duration_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < duration_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000, 512000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

#[derive(Default)]
struct SinkCounters {
    ok: AtomicU64,
    failed: AtomicU64,
    failed_since_report: AtomicU64,
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Completed sampling cycles (monotonic)
    cycles_total: AtomicU64,
    /// Cycles since last report (reset on report)
    cycles_since_report: AtomicU64,
    /// Cycle duration histogram, read to dispatch complete (reset on report)
    cycle_buckets: [AtomicU64; NUM_BUCKETS],
    /// Max cycle duration in microseconds (reset on report)
    cycle_max_us: AtomicU64,
    database: SinkCounters,
    broker: SinkCounters,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_since_report: AtomicU64::new(0),
            cycle_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            cycle_max_us: AtomicU64::new(0),
            database: SinkCounters::default(),
            broker: SinkCounters::default(),
        }
    }

    fn sink(&self, kind: SinkKind) -> &SinkCounters {
        match kind {
            SinkKind::Database => &self.database,
            SinkKind::Broker => &self.broker,
        }
    }

    /// Record one completed sample-build-dispatch cycle
    #[inline]
    pub fn record_cycle(&self, duration_us: u64) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_since_report.fetch_add(1, Ordering::Relaxed);
        self.cycle_buckets[bucket_index(duration_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.cycle_max_us, duration_us);
    }

    #[inline]
    pub fn record_delivery(&self, kind: SinkKind, ok: bool) {
        let counters = self.sink(kind);
        if ok {
            counters.ok.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            counters.failed_since_report.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    pub fn delivered(&self, kind: SinkKind) -> u64 {
        self.sink(kind).ok.load(Ordering::Relaxed)
    }

    pub fn failed(&self, kind: SinkKind) -> u64 {
        self.sink(kind).failed.load(Ordering::Relaxed)
    }

    /// Snapshot and reset the per-interval counters
    pub fn report(&self) -> MetricsSummary {
        let mut buckets = [0u64; NUM_BUCKETS];
        for (i, bucket) in self.cycle_buckets.iter().enumerate() {
            buckets[i] = bucket.swap(0, Ordering::Relaxed);
        }

        MetricsSummary {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles: self.cycles_since_report.swap(0, Ordering::Relaxed),
            cycle_p50_us: percentile_from_buckets(&buckets, 0.50),
            cycle_p99_us: percentile_from_buckets(&buckets, 0.99),
            cycle_max_us: self.cycle_max_us.swap(0, Ordering::Relaxed),
            database_ok: self.database.ok.load(Ordering::Relaxed),
            database_failed: self.database.failed.load(Ordering::Relaxed),
            database_failed_interval: self.database.failed_since_report.swap(0, Ordering::Relaxed),
            broker_ok: self.broker.ok.load(Ordering::Relaxed),
            broker_failed: self.broker.failed.load(Ordering::Relaxed),
            broker_failed_interval: self.broker.failed_since_report.swap(0, Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSummary {
    pub cycles_total: u64,
    pub cycles: u64,
    pub cycle_p50_us: u64,
    pub cycle_p99_us: u64,
    pub cycle_max_us: u64,
    pub database_ok: u64,
    pub database_failed: u64,
    pub database_failed_interval: u64,
    pub broker_ok: u64,
    pub broker_failed: u64,
    pub broker_failed_interval: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            cycles_total = %self.cycles_total,
            cycles = %self.cycles,
            cycle_p50_us = %self.cycle_p50_us,
            cycle_p99_us = %self.cycle_p99_us,
            cycle_max_us = %self.cycle_max_us,
            database_ok = %self.database_ok,
            database_failed = %self.database_failed,
            database_failed_interval = %self.database_failed_interval,
            broker_ok = %self.broker_ok,
            broker_failed = %self.broker_failed,
            broker_failed_interval = %self.broker_failed_interval,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(500), 0);
        assert_eq!(bucket_index(501), 1);
        assert_eq!(bucket_index(256000), 9);
        assert_eq!(bucket_index(1_000_000), 10);
    }

    #[test]
    fn test_record_cycle_and_report() {
        let metrics = Metrics::new();
        metrics.record_cycle(300);
        metrics.record_cycle(1500);
        metrics.record_cycle(70000);

        let summary = metrics.report();
        assert_eq!(summary.cycles_total, 3);
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.cycle_max_us, 70000);
        assert_eq!(summary.cycle_p50_us, 2000);
        assert_eq!(summary.cycle_p99_us, 128000);

        // Interval counters reset, totals do not
        let summary = metrics.report();
        assert_eq!(summary.cycles_total, 3);
        assert_eq!(summary.cycles, 0);
        assert_eq!(summary.cycle_max_us, 0);
        assert_eq!(summary.cycle_p50_us, 0);
    }

    #[test]
    fn test_record_delivery_per_sink() {
        let metrics = Metrics::new();
        metrics.record_delivery(SinkKind::Database, true);
        metrics.record_delivery(SinkKind::Database, false);
        metrics.record_delivery(SinkKind::Broker, true);
        metrics.record_delivery(SinkKind::Broker, true);

        assert_eq!(metrics.delivered(SinkKind::Database), 1);
        assert_eq!(metrics.failed(SinkKind::Database), 1);
        assert_eq!(metrics.delivered(SinkKind::Broker), 2);
        assert_eq!(metrics.failed(SinkKind::Broker), 0);

        let summary = metrics.report();
        assert_eq!(summary.database_failed_interval, 1);
        assert_eq!(metrics.report().database_failed_interval, 0);
        assert_eq!(metrics.report().database_failed, 1);
    }
}
