//! Pipeline metrics.
//!
//! Collected in-memory; the service logs a snapshot on a fixed interval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }
}

/// Latency histogram sized for provider round trips.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s, 60s
    buckets: [AtomicU64; 10],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 10] = [50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds. Values past the last bound land in it.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / count as f64
        }
    }

    /// Returns `(upper_bound_ms, count)` pairs.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the monitoring pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    // Scheduler
    pub ticks: Counter,
    pub parcels_dispatched: Counter,
    pub dispatch_conflicts: Counter,
    pub runs_reclaimed: Counter,
    /// Completions rejected because the run was reclaimed meanwhile
    pub runs_superseded: Counter,

    // Ingestion
    pub ingestion_succeeded: Counter,
    pub ingestion_failed: Counter,
    pub ingestion_no_data: Counter,
    pub gateway_requests: Counter,
    pub gateway_errors: Counter,
    pub gateway_retries: Counter,
    pub observations_written: Counter,

    // Aggregation
    pub series_points_written: Counter,

    // Alerts
    pub alerts_opened: Counter,
    pub alerts_updated: Counter,
    pub alerts_resolved: Counter,
    pub alert_publish_errors: Counter,

    // Latency histograms
    pub fetch_latency_ms: Histogram,

    // Gauges
    pub workers_in_flight: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub ticks: u64,
    pub parcels_dispatched: u64,
    pub dispatch_conflicts: u64,
    pub runs_reclaimed: u64,
    pub runs_superseded: u64,
    pub ingestion_succeeded: u64,
    pub ingestion_failed: u64,
    pub ingestion_no_data: u64,
    pub gateway_requests: u64,
    pub gateway_errors: u64,
    pub gateway_retries: u64,
    pub observations_written: u64,
    pub series_points_written: u64,
    pub alerts_opened: u64,
    pub alerts_updated: u64,
    pub alerts_resolved: u64,
    pub alert_publish_errors: u64,
    pub fetch_latency_mean_ms: f64,
    pub workers_in_flight: u64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            ticks: self.ticks.get(),
            parcels_dispatched: self.parcels_dispatched.get(),
            dispatch_conflicts: self.dispatch_conflicts.get(),
            runs_reclaimed: self.runs_reclaimed.get(),
            runs_superseded: self.runs_superseded.get(),
            ingestion_succeeded: self.ingestion_succeeded.get(),
            ingestion_failed: self.ingestion_failed.get(),
            ingestion_no_data: self.ingestion_no_data.get(),
            gateway_requests: self.gateway_requests.get(),
            gateway_errors: self.gateway_errors.get(),
            gateway_retries: self.gateway_retries.get(),
            observations_written: self.observations_written.get(),
            series_points_written: self.series_points_written.get(),
            alerts_opened: self.alerts_opened.get(),
            alerts_updated: self.alerts_updated.get(),
            alerts_resolved: self.alerts_resolved.get(),
            alert_publish_errors: self.alert_publish_errors.get(),
            fetch_latency_mean_ms: self.fetch_latency_ms.mean(),
            workers_in_flight: self.workers_in_flight.get(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}

/// Logs the current snapshot at info level.
pub fn log_snapshot() {
    let s = metrics().snapshot();
    tracing::info!(
        ticks = s.ticks,
        dispatched = s.parcels_dispatched,
        conflicts = s.dispatch_conflicts,
        reclaimed = s.runs_reclaimed,
        superseded = s.runs_superseded,
        succeeded = s.ingestion_succeeded,
        failed = s.ingestion_failed,
        no_data = s.ingestion_no_data,
        gateway_requests = s.gateway_requests,
        gateway_errors = s.gateway_errors,
        gateway_retries = s.gateway_retries,
        observations = s.observations_written,
        series_points = s.series_points_written,
        alerts_opened = s.alerts_opened,
        alerts_updated = s.alerts_updated,
        alerts_resolved = s.alerts_resolved,
        fetch_latency_mean_ms = s.fetch_latency_mean_ms,
        workers_in_flight = s.workers_in_flight,
        "Pipeline metrics"
    );
}
