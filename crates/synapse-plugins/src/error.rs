//! Plugin error types.

use std::path::PathBuf;

use synapse_component::{ComponentError, ComponentKind};

use crate::descriptor::PluginCategory;
use crate::id::PluginId;

/// Errors from plugin operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// No descriptor with this id was discovered.
    #[error("plugin not found: {0}")]
    NotFound(String),

    /// The plugin id is malformed.
    #[error("invalid plugin id: {0}")]
    InvalidId(String),

    /// A descriptor file could not be read or parsed.
    #[error("descriptor parse error in {path}: {message}")]
    DescriptorParseError {
        /// Path to the descriptor file.
        path: PathBuf,
        /// Parse error message.
        message: String,
    },

    /// A version constraint is neither exact nor `>=`.
    #[error("invalid version constraint '{constraint}': {message}")]
    InvalidConstraint {
        /// The rejected constraint.
        constraint: String,
        /// Why it was rejected.
        message: String,
    },

    /// The descriptor is disabled.
    #[error("plugin is disabled: {0}")]
    Disabled(PluginId),

    /// A dependency was never discovered.
    #[error("plugin {plugin_id} depends on unknown plugin {dependency}")]
    MissingDependency {
        /// The plugin being loaded.
        plugin_id: PluginId,
        /// The unknown dependency.
        dependency: PluginId,
    },

    /// A dependency's discovered version does not satisfy the constraint.
    #[error(
        "plugin {plugin_id} requires {dependency} {required}, but {available} is installed"
    )]
    IncompatibleVersion {
        /// The plugin being loaded.
        plugin_id: PluginId,
        /// The dependency.
        dependency: PluginId,
        /// The required constraint.
        required: String,
        /// The discovered version.
        available: String,
    },

    /// A dependency failed to load.
    #[error("plugin {plugin_id}: dependency {dependency} failed to load: {source}")]
    DependencyFailed {
        /// The plugin being loaded.
        plugin_id: PluginId,
        /// The dependency that failed.
        dependency: PluginId,
        /// Why the dependency failed.
        source: Box<PluginError>,
    },

    /// No factory is registered for the entry point.
    #[error("no factory registered for entry point '{entry_point}' (plugin {plugin_id})")]
    UnknownEntryPoint {
        /// The plugin being loaded.
        plugin_id: PluginId,
        /// The unresolved entry point.
        entry_point: String,
    },

    /// The produced component's kind does not fit the descriptor category.
    #[error("plugin {plugin_id} is declared {category} but produced a {kind} component")]
    CategoryMismatch {
        /// The plugin being loaded.
        plugin_id: PluginId,
        /// Declared category.
        category: PluginCategory,
        /// Kind of the produced component.
        kind: ComponentKind,
    },

    /// Creating, initializing, registering or activating the component failed.
    #[error("plugin load failed: {plugin_id} - {source}")]
    LoadFailed {
        /// The plugin that failed to load.
        plugin_id: PluginId,
        /// Underlying component error.
        source: ComponentError,
    },

    /// Writing a descriptor failed to serialize.
    #[error("descriptor serialization failed: {0}")]
    Serialize(String),

    /// No plugin directory is configured for installation.
    #[error("no plugin directory configured")]
    NoPluginDirectory,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
