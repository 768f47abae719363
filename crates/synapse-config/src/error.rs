//! Configuration error types.

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A TOML document failed to parse or did not match the schema.
    #[error("failed to parse config {path}: {source}")]
    ParseError {
        /// File path, or a marker such as `<embedded defaults>`.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A config file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A value is out of range or contradicts another value.
    #[error("invalid config value for {field}: {message}")]
    ValidationError {
        /// Dotted field path, e.g. `fault.failure_penalty`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The resolved configuration could not be rendered.
    #[error("failed to serialize config: {0}")]
    SerializeError(String),

    /// Neither `SYNAPSE_HOME` nor a platform config directory is available.
    #[error("could not determine a configuration directory")]
    NoHomeDir,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
