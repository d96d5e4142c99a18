//! Error types for the job executor
//!
//! Every failure that can happen while handling one trigger is expressed here.
//! A task that runs and exits non-zero is *not* an error: it is reported as a
//! failed job outcome by the task layer.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Job executor error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Resources
    // ========================================================================
    #[error("Invalid quantity for {field}: '{value}' ({reason})")]
    InvalidQuantity {
        field: String,
        value: String,
        reason: String,
    },

    // ========================================================================
    // Job lifecycle
    // ========================================================================
    #[error("Materialization error: {0}")]
    Materialization(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    // ========================================================================
    // Events
    // ========================================================================
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Event emission failed: {0}")]
    Emit(String),

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build an `InvalidQuantity` error
    pub fn invalid_quantity(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidQuantity {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Whether the triggering event should be considered unhandled, leaving
    /// recovery to upstream redelivery
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Dispatch(_) | Error::Emit(_) | Error::Io(_))
    }

    /// Short machine-readable kind, used in outcome payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::InvalidQuantity { .. } => "invalid_quantity",
            Error::Materialization(_) => "materialization",
            Error::Dispatch(_) => "dispatch",
            Error::InvalidEvent(_) => "invalid_event",
            Error::Emit(_) => "emit",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }
}
