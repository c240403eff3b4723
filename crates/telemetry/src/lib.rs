//! Internal telemetry for the vegetation monitor.
//!
//! Structured logs via `tracing`, in-process counters that are periodically
//! logged as a snapshot, and a health registry for external dependencies.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
