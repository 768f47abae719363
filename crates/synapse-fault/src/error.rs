//! Fault layer error types.

use thiserror::Error;

/// Errors raised by fault layer configuration and the health monitor.
#[derive(Debug, Error)]
pub enum FaultError {
    /// A health check with this name is already registered.
    #[error("health check already registered: {0}")]
    DuplicateCheck(String),

    /// Settings are out of range.
    #[error("invalid fault settings: {0}")]
    InvalidSettings(String),
}

/// Result type for fault layer operations.
pub type FaultResult<T> = Result<T, FaultError>;
