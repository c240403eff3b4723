//! Unified error types for the monitoring pipeline.
//!
//! Error codes are stable and end up in `RunState.last_error`:
//! - DATA_001: No valid pixels
//! - RUN_001-003: Run state conflicts
//! - STORE_001-002: Persistence errors
//! - CONF_001-002: Configuration / validation errors

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the monitoring pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Every pixel was masked or out of range. Callers treat this as NoData.
    #[error("[DATA_001] insufficient data: no valid pixels")]
    InsufficientData,

    /// A run-state compare-and-set lost the race. Not a failure.
    #[error("[RUN_001] parcel {0} is already running")]
    ConcurrencyConflict(Uuid),

    #[error("[RUN_002] invalid transition: {0}")]
    InvalidTransition(String),

    /// The lease no longer matches the run in flight (reclaimed or restarted).
    #[error("[RUN_003] run generation {generation} of parcel {parcel_id} was superseded")]
    SupersededRun { parcel_id: Uuid, generation: u64 },

    #[error("[STORE_001] persistence error: {0}")]
    Persistence(String),

    #[error("[STORE_002] not found: {0}")]
    NotFound(String),

    #[error("[CONF_001] configuration error: {0}")]
    Config(String),

    #[error("[CONF_002] validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the stable error code, if this is a coded error.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::InsufficientData => Some("DATA_001"),
            Self::ConcurrencyConflict(_) => Some("RUN_001"),
            Self::InvalidTransition(_) => Some("RUN_002"),
            Self::SupersededRun { .. } => Some("RUN_003"),
            Self::Persistence(_) => Some("STORE_001"),
            Self::NotFound(_) => Some("STORE_002"),
            Self::Config(_) => Some("CONF_001"),
            Self::Validation(_) => Some("CONF_002"),
            Self::Serialization(_) | Self::Internal(_) => None,
        }
    }

    /// Storage I/O failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}
