//! Provider gateway for the vegetation monitor.
//!
//! The pipeline sees the earth-observation provider as one function: raw
//! per-pixel index values for a boundary and a date, or a typed failure.

pub mod client;
pub mod config;
pub mod error;

pub use client::HttpGateway;
pub use config::*;
pub use error::GatewayError;

use async_trait::async_trait;
use chrono::NaiveDate;
use monitor_core::{Boundary, IndexType};

/// Raw per-pixel values for one acquisition. Masked pixels are NaN.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawValues {
    pub values: Vec<f64>,
}

impl RawValues {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// Source of raw index values.
///
/// Implementations own credentials and transport. They perform no
/// statistics.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn fetch(
        &self,
        boundary: &Boundary,
        index_type: IndexType,
        date: NaiveDate,
    ) -> Result<RawValues, GatewayError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "provider"
    }
}
