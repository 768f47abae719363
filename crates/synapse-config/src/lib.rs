//! Synapse Config - layered configuration for the Synapse runtime.
//!
//! A single [`Config`] covers logging, the event bus, the fault layer, plugin
//! loading and per-component settings.
//!
//! # Usage
//!
//! ```rust,no_run
//! use synapse_config::Config;
//!
//! let resolved = Config::load(None).unwrap();
//! println!("plugin dirs: {:?}", resolved.config.plugins.dirs);
//! ```
//!
//! # Precedence
//!
//! From highest to lowest priority:
//!
//! 1. The config file: an explicit path, else `$SYNAPSE_HOME/config.toml`,
//!    else `config.toml` in the platform config directory
//! 2. `SYNAPSE_*` environment variables (fallback only)
//! 3. Embedded defaults (`defaults.toml` compiled into the binary)
//!
//! # Design
//!
//! This crate depends on no other Synapse crate. Conversion to runtime types
//! happens in the runtime's config bridge.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Environment variable fallbacks.
pub mod env;
/// Configuration error types.
pub mod error;
/// Config file discovery and loading.
pub mod loader;
/// Layered merging with source tracking.
pub mod merge;
/// Resolved configuration display.
pub mod show;
/// Configuration struct definitions.
pub mod types;
/// Validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use merge::ConfigLayer;
pub use show::{ResolvedConfig, ShowFormat};
pub use types::*;

impl Config {
    /// Load with the full precedence chain.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a file is malformed or the result fails
    /// validation.
    pub fn load(explicit: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(explicit, None)
    }

    /// Load with an explicit directory in place of `SYNAPSE_HOME`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a file is malformed or the result fails
    /// validation.
    pub fn load_with_home(
        explicit: Option<&std::path::Path>,
        home_dir: &std::path::Path,
    ) -> ConfigResult<ResolvedConfig> {
        loader::load(explicit, Some(home_dir))
    }

    /// Load one file without layering.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed or fails
    /// validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }

    /// Settings for the component `name`, if any were configured.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ComponentTable> {
        self.components.get(name)
    }
}
