//! Compiled-in component factories.
//!
//! Plugins are a build-time choice: a descriptor's `entry_point` names a
//! factory registered here, which builds the component at load time.
//! Built-in plugins register their descriptor alongside the factory and are
//! merged into discovery results.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use synapse_component::{Component, ComponentResult};

use crate::descriptor::PluginDescriptor;
use crate::error::{PluginError, PluginResult};

/// Builds a component for a descriptor.
pub type ComponentFactory =
    Arc<dyn Fn(&PluginDescriptor) -> ComponentResult<Box<dyn Component>> + Send + Sync>;

/// Entry point name to factory.
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: BTreeMap<String, ComponentFactory>,
    builtins: Vec<PluginDescriptor>,
}

impl FactoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under an entry point, replacing any previous one.
    pub fn register<F>(&mut self, entry_point: impl Into<String>, factory: F)
    where
        F: Fn(&PluginDescriptor) -> ComponentResult<Box<dyn Component>> + Send + Sync + 'static,
    {
        self.factories.insert(entry_point.into(), Arc::new(factory));
    }

    /// Register a built-in plugin: its descriptor plus the factory for its
    /// entry point.
    pub fn register_builtin<F>(&mut self, descriptor: PluginDescriptor, factory: F)
    where
        F: Fn(&PluginDescriptor) -> ComponentResult<Box<dyn Component>> + Send + Sync + 'static,
    {
        self.register(descriptor.entry_point.clone(), factory);
        self.builtins.retain(|d| d.id != descriptor.id);
        self.builtins.push(descriptor);
    }

    /// Whether a factory exists for `entry_point`.
    #[must_use]
    pub fn contains(&self, entry_point: &str) -> bool {
        self.factories.contains_key(entry_point)
    }

    /// Registered entry points, sorted.
    pub fn entry_points(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Descriptors of built-in plugins.
    #[must_use]
    pub fn builtin_descriptors(&self) -> &[PluginDescriptor] {
        &self.builtins
    }

    /// Build the component for a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::UnknownEntryPoint`] without a matching factory,
    /// or [`PluginError::LoadFailed`] if the factory fails.
    pub fn create(&self, descriptor: &PluginDescriptor) -> PluginResult<Box<dyn Component>> {
        let factory = self.factories.get(&descriptor.entry_point).ok_or_else(|| {
            PluginError::UnknownEntryPoint {
                plugin_id: descriptor.id.clone(),
                entry_point: descriptor.entry_point.clone(),
            }
        })?;
        factory(descriptor).map_err(|source| PluginError::LoadFailed {
            plugin_id: descriptor.id.clone(),
            source,
        })
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("entry_points", &self.factories.keys().collect::<Vec<_>>())
            .field("builtins", &self.builtins.len())
            .finish()
    }
}
