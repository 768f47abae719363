//! Synapse Telemetry - log subscriber setup for the Synapse runtime.
//!
//! All Synapse crates log through `tracing` macros with structured fields
//! such as `component`, `event_id` and `plugin_id`. Component workers and
//! receptors run inside a [`component_span`], so every line they emit carries
//! the component's name and kind, and a single component can be logged at a
//! different level than the rest. This crate builds the subscriber: an
//! `EnvFilter` from a base level, raw directives and per-component levels,
//! and one `fmt` layer in the chosen [`LogFormat`] writing to stdout, stderr
//! or rolling files.
//!
//! With the `config` feature, a `synapse_config::LoggingSection` converts
//! into a [`LogConfig`].
//!
//! # Example
//!
//! ```rust,no_run
//! use synapse_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), synapse_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("synapse_plugins=debug")
//!     .with_component_level("camera", "trace");
//!
//! setup_logging(&config)?;
//! tracing::info!(component = "camera", "Component activated");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;
mod span;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
pub use span::{COMPONENT_SPAN, component_directive, component_span};
