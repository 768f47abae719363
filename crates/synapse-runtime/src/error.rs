//! Runtime error types.

use thiserror::Error;

/// Errors that can occur in the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// `start` was called on a running runtime.
    #[error("Runtime is already running")]
    AlreadyRunning,

    /// The operation needs a running runtime.
    #[error("Runtime is not running")]
    NotRunning,

    /// Plugin error.
    #[error("Plugin error: {0}")]
    Plugin(#[from] synapse_plugins::PluginError),

    /// Component error.
    #[error("Component error: {0}")]
    Component(#[from] synapse_component::ComponentError),

    /// Fault layer error.
    #[error("Fault layer error: {0}")]
    Fault(#[from] synapse_fault::FaultError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] synapse_config::ConfigError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
