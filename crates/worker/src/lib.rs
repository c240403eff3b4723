//! Pipeline workers for the vegetation monitor.
//!
//! - Scheduler (due parcels → bounded worker pool)
//! - Ingestion (provider → statistics → observations)
//! - Aggregation (observations → weekly/monthly series)
//! - Alerts (rules over observations and series)

pub mod aggregation;
pub mod alerts;
pub mod config;
pub mod ingestion;
pub mod retry;
pub mod scheduler;

pub use aggregation::{AggregationEngine, AggregationSummary};
pub use alerts::{AlertEngine, AlertRules, EvaluationSummary};
pub use config::*;
pub use ingestion::{fetch_window, FetchWindow, IngestionOutcome, IngestionWorker, ParcelWorker};
pub use retry::{RetryPolicy, Retryable};
pub use scheduler::{BackgroundTasks, Scheduler, TickSummary};
