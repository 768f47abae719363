//! Synapse Test - shared test utilities for the Synapse runtime.
//!
//! Mock components, event collectors, plugin directory fixtures and small
//! async helpers, used by the other crates as a dev-dependency.
//!
//! ```toml
//! [dev-dependencies]
//! synapse-test.workspace = true
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
