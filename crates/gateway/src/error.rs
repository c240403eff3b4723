//! Provider failure taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Typed provider failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// No cloud-free image for the date. Not retried; the date is skipped.
    #[error("no data available for the requested date")]
    NoData,

    /// Provider quota hit. Retried with backoff.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// Network failure, timeout or 5xx. Retried with backoff up to a cap.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Auth or configuration problem. Ingestion for the parcel halts.
    #[error("fatal provider error: {0}")]
    Fatal(String),
}

impl GatewayError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// Minimum wait the provider asked for, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classifies a non-success HTTP status from the provider.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        match status {
            204 | 404 => Self::NoData,
            429 => Self::RateLimited { retry_after },
            408 | 500..=599 => Self::Transient(format!("provider returned {}: {}", status, body)),
            401 | 403 => Self::Fatal(format!("provider rejected credentials ({})", status)),
            _ => Self::Fatal(format!("provider returned {}: {}", status, body)),
        }
    }
}
