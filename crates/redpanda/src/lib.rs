//! Outbound alert boundary.
//!
//! The alert engine publishes every created, updated and resolved alert
//! through an [`AlertSink`]. Deployments without a broker use [`LogSink`].

pub mod config;
pub mod health;
pub mod producer;
pub mod sink;

pub use config::*;
pub use producer::*;
pub use sink::*;
