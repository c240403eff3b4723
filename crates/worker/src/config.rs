//! Worker configuration sections.

use monitor_core::FailureBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gateway retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the random delay added to each backoff
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Ingestion worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Days the provider needs before a date's imagery is available
    #[serde(default = "default_availability_lag_days")]
    pub availability_lag_days: u32,
    /// History fetched for a parcel that was never ingested
    #[serde(default = "default_backfill_days")]
    pub backfill_days: u32,
    /// Upper bound on dates fetched in one run
    #[serde(default = "default_max_dates_per_run")]
    pub max_dates_per_run: u32,
    /// Per-call gateway timeout
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub failure_backoff: FailureBackoff,
    /// Attempts for each store write before the run is failed
    #[serde(default = "default_store_retry_attempts")]
    pub store_retry_attempts: u32,
    #[serde(default = "default_store_retry_delay_ms")]
    pub store_retry_delay_ms: u64,
}

fn default_availability_lag_days() -> u32 {
    2
}

fn default_backfill_days() -> u32 {
    90
}

fn default_max_dates_per_run() -> u32 {
    31
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

fn default_store_retry_attempts() -> u32 {
    3
}

fn default_store_retry_delay_ms() -> u64 {
    100
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            availability_lag_days: default_availability_lag_days(),
            backfill_days: default_backfill_days(),
            max_dates_per_run: default_max_dates_per_run(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            retry: RetryConfig::default(),
            failure_backoff: FailureBackoff::default(),
            store_retry_attempts: default_store_retry_attempts(),
            store_retry_delay_ms: default_store_retry_delay_ms(),
        }
    }
}

impl IngestionConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Worker pool size
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Runs in flight longer than this are treated as abandoned
    #[serde(default = "default_stale_run_after_secs")]
    pub stale_run_after_secs: u64,
    #[serde(default = "default_metrics_log_interval_secs")]
    pub metrics_log_interval_secs: u64,
}

fn default_tick_interval_secs() -> u64 {
    300
}

fn default_max_concurrency() -> usize {
    8
}

fn default_stale_run_after_secs() -> u64 {
    3600
}

fn default_metrics_log_interval_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            max_concurrency: default_max_concurrency(),
            stale_run_after_secs: default_stale_run_after_secs(),
            metrics_log_interval_secs: default_metrics_log_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn stale_run_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_run_after_secs).unwrap_or(i64::MAX))
    }

    pub fn metrics_log_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_log_interval_secs)
    }
}

/// Aggregation engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_aggregation_interval_secs")]
    pub interval_secs: u64,
    /// Periods ending within this many days of today are still recomputed
    #[serde(default = "default_settle_days")]
    pub settle_days: u32,
    /// Daily means before a period used for its anomaly flag
    #[serde(default = "default_anomaly_window_days")]
    pub anomaly_window_days: u32,
    #[serde(default = "default_anomaly_z_threshold")]
    pub anomaly_z_threshold: f64,
    #[serde(default = "default_anomaly_min_samples")]
    pub anomaly_min_samples: usize,
}

fn default_aggregation_interval_secs() -> u64 {
    86_400
}

fn default_settle_days() -> u32 {
    7
}

fn default_anomaly_window_days() -> u32 {
    30
}

fn default_anomaly_z_threshold() -> f64 {
    2.0
}

fn default_anomaly_min_samples() -> usize {
    5
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_aggregation_interval_secs(),
            settle_days: default_settle_days(),
            anomaly_window_days: default_anomaly_window_days(),
            anomaly_z_threshold: default_anomaly_z_threshold(),
            anomaly_min_samples: default_anomaly_min_samples(),
        }
    }
}

impl AggregationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
