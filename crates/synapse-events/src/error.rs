//! Event error types.

use thiserror::Error;

/// Errors produced while converting events to or from their serialized form.
#[derive(Debug, Error)]
pub enum EventError {
    /// The serialized record could not be decoded.
    #[error("invalid event record: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type for event conversions.
pub type EventResult<T> = Result<T, EventError>;
