//! Synapse Runtime - wires the event bus, fault layer, coordinator and
//! plugin manager into one process.
//!
//! This crate provides:
//! - [`RuntimeContext`], the shared handles passed to every subsystem
//! - [`Runtime`], which starts and stops everything in order and hot-loads
//!   plugins while running
//! - [`config_bridge`], the conversion from [`synapse_config::Config`]
//!
//! # Example
//!
//! ```rust,no_run
//! use synapse_config::Config;
//! use synapse_plugins::FactoryRegistry;
//! use synapse_runtime::Runtime;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolved = Config::load(None)?;
//! let runtime = Runtime::from_config(&resolved.config, FactoryRegistry::new())?;
//!
//! let report = runtime.start().await?;
//! println!("{} components active", report.activation.activated);
//!
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config_bridge;
pub mod prelude;

mod context;
mod error;
mod runtime;

pub use context::RuntimeContext;
pub use error::{RuntimeError, RuntimeResult};
pub use runtime::{RUNTIME_SOURCE, Runtime, RuntimeSettings, RuntimeStats, StartReport};
