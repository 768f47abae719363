//! Synapse Plugins - discovery, dependency ordering and hot loading of
//! component plugins.
//!
//! A plugin is a directory holding a descriptor (`plugin.toml`, or
//! `plugin.json`) whose `entry_point` names a factory compiled into the
//! host. This crate provides:
//!
//! - [`PluginDescriptor`] and its on-disk formats
//! - [`discover`], a recursive scan of plugin directories
//! - [`DependencyGraph`] with a cycle-tolerant topological sort
//! - [`FactoryRegistry`], mapping entry points to component factories
//! - [`PluginManager`], which loads plugins in dependency order into a
//!   [`Coordinator`](synapse_component::Coordinator) and unloads, reloads,
//!   enables, disables, installs and uninstalls them at runtime
//!
//! # Version constraints
//!
//! Dependencies name an exact version (`"1.2.0"`, `"=1.2.0"`) or a minimum
//! (`">=1.2.0"`). Any other form is rejected when the descriptor is parsed.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod descriptor;
mod discovery;
mod error;
mod factory;
mod graph;
mod id;
mod install;
mod manager;
mod version;

pub use descriptor::{
    DescriptorFormat, JSON_DESCRIPTOR, PluginCategory, PluginDescriptor, TOML_DESCRIPTOR,
};
pub use discovery::{discover, scan_dir};
pub use error::{PluginError, PluginResult};
pub use factory::{ComponentFactory, FactoryRegistry};
pub use graph::{DependencyGraph, LoadOrder};
pub use id::PluginId;
pub use install::Installer;
pub use manager::{LoadSummary, PluginManager, PluginSettings, PluginStats};
pub use version::VersionConstraint;
