//! Plugin manager: discovery, dependency-ordered loading and hot
//! load/unload through the coordinator.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use synapse_component::{ComponentHandle, Coordinator};
use synapse_events::Payload;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::descriptor::{PluginCategory, PluginDescriptor};
use crate::discovery;
use crate::error::{PluginError, PluginResult};
use crate::factory::FactoryRegistry;
use crate::graph::DependencyGraph;
use crate::id::PluginId;
use crate::install::Installer;

/// Plugin manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSettings {
    /// Directories scanned for descriptors, in priority order. The first one
    /// also receives installs.
    pub dirs: Vec<PathBuf>,
    /// Allow-list. When non-empty, only these ids load automatically.
    pub enabled: BTreeSet<String>,
    /// Deny-list. These ids never load automatically.
    pub disabled: BTreeSet<String>,
    /// Load enabled plugins during [`PluginManager::initialize`].
    pub auto_load: bool,
    /// Activate components right after loading them.
    pub activate_on_load: bool,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            dirs: vec![PathBuf::from("plugins")],
            enabled: BTreeSet::new(),
            disabled: BTreeSet::new(),
            auto_load: true,
            activate_on_load: false,
        }
    }
}

/// Outcome of [`PluginManager::load_enabled_plugins`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    /// Plugins loaded (or already loaded) during the pass.
    pub loaded: Vec<PluginId>,
    /// Plugins that failed, with the rendered error.
    pub failed: Vec<(PluginId, String)>,
    /// Plugins not eligible for automatic loading.
    pub skipped: Vec<PluginId>,
}

/// Snapshot of the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStats {
    /// Discovered descriptors.
    pub discovered: usize,
    /// Loaded plugin ids.
    pub loaded: Vec<PluginId>,
    /// Plugins that will not load automatically.
    pub disabled: Vec<PluginId>,
    /// Discovered plugins whose dependencies are missing.
    pub unsatisfied: BTreeMap<PluginId, Vec<PluginId>>,
    /// `(plugin, dependency)` edges skipped while loading because they close
    /// a dependency cycle.
    pub cycles: Vec<(PluginId, PluginId)>,
}

#[derive(Default)]
struct State {
    descriptors: BTreeMap<PluginId, PluginDescriptor>,
    graph: DependencyGraph,
    loaded: BTreeMap<PluginId, Arc<ComponentHandle>>,
    enabled: BTreeSet<String>,
    disabled: BTreeSet<String>,
    cycles: BTreeSet<(PluginId, PluginId)>,
}

impl State {
    fn is_eligible(&self, descriptor: &PluginDescriptor) -> bool {
        let id = descriptor.id.as_str();
        descriptor.enabled
            && (self.enabled.is_empty() || self.enabled.contains(id))
            && !self.disabled.contains(id)
    }
}

type LoadFuture<'a> = Pin<Box<dyn Future<Output = PluginResult<Arc<ComponentHandle>>> + Send + 'a>>;

/// Discovers plugin descriptors and loads them into the coordinator.
///
/// All mutating operations are serialized by one async lock, so a load and
/// an unload of the same plugin never interleave.
pub struct PluginManager {
    dirs: Vec<PathBuf>,
    auto_load: bool,
    activate_on_load: bool,
    factories: FactoryRegistry,
    coordinator: Arc<Coordinator>,
    component_config: BTreeMap<String, Payload>,
    state: Mutex<State>,
}

impl PluginManager {
    /// Create a manager. Nothing is discovered until
    /// [`initialize`](Self::initialize) or [`discover`](Self::discover).
    #[must_use]
    pub fn new(
        settings: PluginSettings,
        factories: FactoryRegistry,
        coordinator: Arc<Coordinator>,
    ) -> Self {
        let state = State {
            enabled: settings.enabled,
            disabled: settings.disabled,
            ..State::default()
        };
        Self {
            dirs: settings.dirs,
            auto_load: settings.auto_load,
            activate_on_load: settings.activate_on_load,
            factories,
            coordinator,
            component_config: BTreeMap::new(),
            state: Mutex::new(state),
        }
    }

    /// Per-plugin configuration overrides, keyed by plugin id.
    #[must_use]
    pub fn with_component_config(mut self, config: BTreeMap<String, Payload>) -> Self {
        self.component_config = config;
        self
    }

    /// Scanned directories.
    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// The factory registry.
    #[must_use]
    pub fn factories(&self) -> &FactoryRegistry {
        &self.factories
    }

    /// Discover descriptors and, when auto-loading, load enabled plugins.
    pub async fn initialize(&self) -> LoadSummary {
        let count = self.discover().await;
        info!(count, auto_load = self.auto_load, "Plugin manager initialized");
        if self.auto_load {
            self.load_enabled_plugins().await
        } else {
            LoadSummary::default()
        }
    }

    /// Re-scan the plugin directories and rebuild the dependency graph.
    /// Returns the number of known descriptors. Loaded plugins stay loaded.
    pub async fn discover(&self) -> usize {
        let mut state = self.state.lock().await;
        self.rediscover(&mut state);
        state.descriptors.len()
    }

    /// Ids in dependency order, dependencies first.
    pub async fn load_order(&self) -> Vec<PluginId> {
        self.state.lock().await.graph.load_order().order
    }

    /// Load a plugin and, first, its dependencies. Loading a loaded plugin
    /// returns the existing handle.
    ///
    /// # Errors
    ///
    /// Fails if the plugin is unknown or disabled, a dependency is missing,
    /// incompatible or fails to load, or the component cannot be built,
    /// initialized or registered. A failed load registers nothing for this
    /// plugin.
    pub async fn load_plugin(&self, id: &str) -> PluginResult<Arc<ComponentHandle>> {
        let mut state = self.state.lock().await;
        let id = known_id(&state, id)?;
        self.load_locked(&mut state, id, &mut Vec::new()).await
    }

    /// Deactivate and unregister a loaded plugin's component. Returns `false`
    /// if it was not loaded. Dependents stay loaded.
    pub async fn unload_plugin(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        self.unload_locked(&mut state, id).await
    }

    /// Unload, re-discover, then load again. Not atomic: if the load fails
    /// the plugin stays unloaded.
    ///
    /// # Errors
    ///
    /// See [`load_plugin`](Self::load_plugin).
    pub async fn reload_plugin(&self, id: &str) -> PluginResult<Arc<ComponentHandle>> {
        let mut state = self.state.lock().await;
        self.unload_locked(&mut state, id).await;
        self.rediscover(&mut state);
        let id = known_id(&state, id)?;
        self.load_locked(&mut state, id, &mut Vec::new()).await
    }

    /// Load every eligible plugin in dependency order. Failures are logged
    /// and loading continues.
    pub async fn load_enabled_plugins(&self) -> LoadSummary {
        let mut state = self.state.lock().await;
        let order = state.graph.load_order().order;
        let mut summary = LoadSummary::default();
        for id in order {
            let eligible = state
                .descriptors
                .get(&id)
                .is_some_and(|descriptor| state.is_eligible(descriptor));
            if !eligible {
                debug!(plugin_id = %id, "Plugin not eligible for automatic loading");
                summary.skipped.push(id);
                continue;
            }
            match self.load_locked(&mut state, id.clone(), &mut Vec::new()).await {
                Ok(_) => summary.loaded.push(id),
                Err(e) => {
                    error!(plugin_id = %id, error = %e, "Failed to load plugin");
                    summary.failed.push((id, e.to_string()));
                },
            }
        }
        info!(
            loaded = summary.loaded.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "Loaded enabled plugins"
        );
        summary
    }

    /// Enable a plugin and persist the flag to its descriptor file.
    ///
    /// # Errors
    ///
    /// Fails for unknown plugins or if the descriptor cannot be written.
    pub async fn enable_plugin(&self, id: &str) -> PluginResult<()> {
        let mut state = self.state.lock().await;
        let id = known_id(&state, id)?;
        set_enabled(&mut state, &id, true)?;
        state.disabled.remove(id.as_str());
        if !state.enabled.is_empty() {
            state.enabled.insert(id.to_string());
        }
        info!(plugin_id = %id, "Plugin enabled");
        Ok(())
    }

    /// Disable a plugin, persist the flag and unload it if loaded.
    ///
    /// # Errors
    ///
    /// Fails for unknown plugins or if the descriptor cannot be written.
    pub async fn disable_plugin(&self, id: &str) -> PluginResult<()> {
        let mut state = self.state.lock().await;
        let id = known_id(&state, id)?;
        set_enabled(&mut state, &id, false)?;
        state.enabled.remove(id.as_str());
        state.disabled.insert(id.to_string());
        self.unload_locked(&mut state, id.as_str()).await;
        info!(plugin_id = %id, "Plugin disabled");
        Ok(())
    }

    /// Install a plugin directory into the first plugin directory and
    /// re-discover.
    ///
    /// # Errors
    ///
    /// Fails without a plugin directory or if installation fails.
    pub async fn install(&self, src: &Path) -> PluginResult<PluginDescriptor> {
        let root = self.dirs.first().ok_or(PluginError::NoPluginDirectory)?;
        let installed = Installer::new(root).install_from_directory(src)?;
        let mut state = self.state.lock().await;
        self.rediscover(&mut state);
        Ok(installed)
    }

    /// Unload a plugin and remove its installed directory.
    ///
    /// # Errors
    ///
    /// Fails for unknown plugins or if removal fails.
    pub async fn uninstall(&self, id: &str) -> PluginResult<bool> {
        let root = self.dirs.first().ok_or(PluginError::NoPluginDirectory)?;
        let mut state = self.state.lock().await;
        let id = known_id(&state, id)?;
        self.unload_locked(&mut state, id.as_str()).await;
        let removed = match state.descriptors.get(&id) {
            Some(descriptor) => Installer::new(root).uninstall(descriptor)?,
            None => false,
        };
        self.rediscover(&mut state);
        Ok(removed)
    }

    /// A discovered descriptor.
    pub async fn descriptor(&self, id: &str) -> Option<PluginDescriptor> {
        self.state.lock().await.descriptors.get(id).cloned()
    }

    /// All discovered descriptors, by id.
    pub async fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.state.lock().await.descriptors.values().cloned().collect()
    }

    /// Discovered descriptors of one category.
    pub async fn descriptors_by_category(&self, category: PluginCategory) -> Vec<PluginDescriptor> {
        self.state
            .lock()
            .await
            .descriptors
            .values()
            .filter(|d| d.category == category)
            .cloned()
            .collect()
    }

    /// Whether a plugin is loaded.
    pub async fn is_loaded(&self, id: &str) -> bool {
        self.state.lock().await.loaded.contains_key(id)
    }

    /// The component of a loaded plugin.
    pub async fn loaded_component(&self, id: &str) -> Option<Arc<ComponentHandle>> {
        self.state.lock().await.loaded.get(id).cloned()
    }

    /// Loaded plugin ids.
    pub async fn loaded_ids(&self) -> Vec<PluginId> {
        self.state.lock().await.loaded.keys().cloned().collect()
    }

    /// Snapshot of the manager.
    pub async fn stats(&self) -> PluginStats {
        let state = self.state.lock().await;
        PluginStats {
            discovered: state.descriptors.len(),
            loaded: state.loaded.keys().cloned().collect(),
            disabled: state
                .descriptors
                .values()
                .filter(|d| !state.is_eligible(d))
                .map(|d| d.id.clone())
                .collect(),
            unsatisfied: state
                .descriptors
                .keys()
                .filter_map(|id| {
                    let missing: Vec<PluginId> = state.graph.unsatisfied(id).cloned().collect();
                    (!missing.is_empty()).then(|| (id.clone(), missing))
                })
                .collect(),
            cycles: state.cycles.iter().cloned().collect(),
        }
    }

    fn rediscover(&self, state: &mut State) {
        let mut descriptors = BTreeMap::new();
        for builtin in self.factories.builtin_descriptors() {
            discovery::merge(&mut descriptors, builtin.clone());
        }
        for descriptor in discovery::discover(&self.dirs).into_values() {
            discovery::merge(&mut descriptors, descriptor);
        }
        state.graph = DependencyGraph::build(descriptors.values());
        state.descriptors = descriptors;
        state.cycles.clear();
    }

    fn load_locked<'a>(
        &'a self,
        state: &'a mut State,
        id: PluginId,
        stack: &'a mut Vec<PluginId>,
    ) -> LoadFuture<'a> {
        Box::pin(async move {
            if let Some(handle) = state.loaded.get(&id) {
                debug!(plugin_id = %id, "Plugin already loaded");
                return Ok(Arc::clone(handle));
            }
            let descriptor = state
                .descriptors
                .get(&id)
                .cloned()
                .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
            if !descriptor.enabled {
                info!(plugin_id = %id, "Plugin is disabled, not loading");
                return Err(PluginError::Disabled(id));
            }

            stack.push(id.clone());
            let result = self.load_with_dependencies(state, &descriptor, stack).await;
            stack.pop();
            result
        })
    }

    async fn load_with_dependencies(
        &self,
        state: &mut State,
        descriptor: &PluginDescriptor,
        stack: &mut Vec<PluginId>,
    ) -> PluginResult<Arc<ComponentHandle>> {
        let id = &descriptor.id;
        for (dependency, constraint) in &descriptor.dependencies {
            let Some(available) = state.descriptors.get(dependency) else {
                return Err(PluginError::MissingDependency {
                    plugin_id: id.clone(),
                    dependency: dependency.clone(),
                });
            };
            if !constraint.matches(&available.version) {
                return Err(PluginError::IncompatibleVersion {
                    plugin_id: id.clone(),
                    dependency: dependency.clone(),
                    required: constraint.to_string(),
                    available: available.version.to_string(),
                });
            }
            if stack.contains(dependency) {
                error!(
                    plugin_id = %id,
                    dependency = %dependency,
                    "Circular plugin dependency detected, skipping"
                );
                state.cycles.insert((id.clone(), dependency.clone()));
                continue;
            }
            if !state.loaded.contains_key(dependency) {
                self.load_locked(state, dependency.clone(), stack)
                    .await
                    .map_err(|e| PluginError::DependencyFailed {
                        plugin_id: id.clone(),
                        dependency: dependency.clone(),
                        source: Box::new(e),
                    })?;
            }
        }

        let handle = self.instantiate(descriptor).await?;
        state.loaded.insert(id.clone(), Arc::clone(&handle));
        info!(
            plugin_id = %id,
            name = %descriptor.name,
            version = %descriptor.version,
            component = %handle.name(),
            "Plugin loaded"
        );
        Ok(handle)
    }

    async fn instantiate(&self, descriptor: &PluginDescriptor) -> PluginResult<Arc<ComponentHandle>> {
        let id = &descriptor.id;
        let failed = |source| PluginError::LoadFailed {
            plugin_id: id.clone(),
            source,
        };

        let component = self.factories.create(descriptor)?;
        let kind = component.kind();
        if !descriptor.category.accepts(kind) {
            return Err(PluginError::CategoryMismatch {
                plugin_id: id.clone(),
                category: descriptor.category,
                kind,
            });
        }

        let handle = self.coordinator.handle(component);
        let config = descriptor.component_config(self.component_config.get(id.as_str()));
        handle.initialize(&config).await.map_err(failed)?;
        let name = handle.name().to_string();
        let handle = self.coordinator.register(handle).map_err(failed)?;

        if self.activate_on_load
            && let Err(e) = self.coordinator.activate(kind, &name).await
        {
            if let Err(cleanup) = self.coordinator.unregister(kind, &name).await {
                warn!(plugin_id = %id, error = %cleanup, "Cleanup after failed activation failed");
            }
            return Err(failed(e));
        }
        Ok(handle)
    }

    async fn unload_locked(&self, state: &mut State, id: &str) -> bool {
        let Some(handle) = state.loaded.get(id).cloned() else {
            warn!(plugin_id = %id, "Plugin not loaded, nothing to unload");
            return false;
        };
        if let Some(key) = state.descriptors.get(id).map(|d| d.id.clone()) {
            let dependents: Vec<String> = state
                .graph
                .dependents(&key)
                .into_iter()
                .filter(|dependent| state.loaded.contains_key(dependent))
                .map(|dependent| dependent.to_string())
                .collect();
            if !dependents.is_empty() {
                warn!(
                    plugin_id = %id,
                    dependents = ?dependents,
                    "Unloading a plugin that loaded plugins depend on"
                );
            }
        }
        if let Err(e) = self.coordinator.unregister(handle.kind(), handle.name()).await {
            warn!(plugin_id = %id, error = %e, "Plugin component was not registered");
        }
        state.loaded.remove(id);
        info!(plugin_id = %id, "Plugin unloaded");
        true
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("dirs", &self.dirs)
            .field("auto_load", &self.auto_load)
            .field("activate_on_load", &self.activate_on_load)
            .field("factories", &self.factories)
            .finish_non_exhaustive()
    }
}

fn known_id(state: &State, id: &str) -> PluginResult<PluginId> {
    state
        .descriptors
        .get_key_value(id)
        .map(|(key, _)| key.clone())
        .ok_or_else(|| PluginError::NotFound(id.to_string()))
}

fn set_enabled(state: &mut State, id: &PluginId, enabled: bool) -> PluginResult<()> {
    let Some(descriptor) = state.descriptors.get_mut(id) else {
        return Err(PluginError::NotFound(id.to_string()));
    };
    if descriptor.enabled == enabled {
        debug!(plugin_id = %id, enabled, "Plugin flag unchanged");
        return Ok(());
    }
    let mut updated = descriptor.clone();
    updated.enabled = enabled;
    updated.save()?;
    *descriptor = updated;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use synapse_component::{Component, ComponentKind, ComponentResult};
    use synapse_events::EventBus;
    use synapse_fault::FaultLayer;
    use tempfile::TempDir;

    type Configs = Arc<StdMutex<BTreeMap<String, Payload>>>;

    struct Stub {
        name: String,
        kind: ComponentKind,
        configs: Configs,
    }

    #[async_trait]
    impl Component for Stub {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ComponentKind {
            self.kind
        }

        async fn initialize(&mut self, config: &Payload) -> ComponentResult<()> {
            self.configs
                .lock()
                .unwrap()
                .insert(self.name.clone(), config.clone());
            Ok(())
        }
    }

    fn factories(configs: &Configs) -> FactoryRegistry {
        let mut registry = FactoryRegistry::new();
        for (entry_point, kind) in [
            ("input", ComponentKind::Input),
            ("output", ComponentKind::Output),
            ("connector", ComponentKind::Connector),
        ] {
            let configs = Arc::clone(configs);
            registry.register(entry_point, move |d: &PluginDescriptor| {
                Ok(Box::new(Stub {
                    name: d.id.to_string(),
                    kind,
                    configs: Arc::clone(&configs),
                }) as Box<dyn Component>)
            });
        }
        registry
    }

    struct Fixture {
        dir: TempDir,
        coordinator: Arc<Coordinator>,
        configs: Configs,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                coordinator: Arc::new(Coordinator::new(
                    EventBus::new(),
                    Arc::new(FaultLayer::default()),
                )),
                configs: Configs::default(),
            }
        }

        fn plugin(&self, id: &str, version: &str, entry: &str, deps: &[(&str, &str)]) {
            self.plugin_with(id, version, entry, deps, "");
        }

        fn plugin_with(&self, id: &str, version: &str, entry: &str, deps: &[(&str, &str)], extra: &str) {
            let dir = self.dir.path().join(id);
            std::fs::create_dir_all(&dir).unwrap();
            let mut text = format!(
                "id = \"{id}\"\nname = \"{id}\"\nversion = \"{version}\"\nentry_point = \"{entry}\"\n{extra}\n"
            );
            if !deps.is_empty() {
                text.push_str("[dependencies]\n");
                for (dep, constraint) in deps {
                    text.push_str(&format!("{dep} = \"{constraint}\"\n"));
                }
            }
            std::fs::write(dir.join("plugin.toml"), text).unwrap();
        }

        fn settings(&self) -> PluginSettings {
            PluginSettings {
                dirs: vec![self.dir.path().to_path_buf()],
                ..PluginSettings::default()
            }
        }

        async fn manager(&self, settings: PluginSettings) -> PluginManager {
            let manager = PluginManager::new(
                settings,
                factories(&self.configs),
                Arc::clone(&self.coordinator),
            );
            manager.discover().await;
            manager
        }
    }

    #[tokio::test]
    async fn test_dependencies_load_first() {
        let fx = Fixture::new();
        fx.plugin("a", "1.2.0", "input", &[]);
        fx.plugin("b", "1.0.0", "output", &[("a", ">=1.0.0")]);
        let manager = fx.manager(fx.settings()).await;

        assert_eq!(manager.load_order().await, [PluginId::from_static("a"), PluginId::from_static("b")]);
        manager.load_plugin("b").await.unwrap();
        assert!(manager.is_loaded("a").await);
        assert!(manager.is_loaded("b").await);
        assert!(fx.coordinator.get(ComponentKind::Input, "a").is_some());
        assert!(fx.coordinator.get(ComponentKind::Output, "b").is_some());

        let again = manager.load_plugin("b").await.unwrap();
        assert!(Arc::ptr_eq(&again, &manager.loaded_component("b").await.unwrap()));
        assert_eq!(fx.coordinator.len(), 2);
    }

    #[tokio::test]
    async fn test_incompatible_dependency_registers_nothing() {
        let fx = Fixture::new();
        fx.plugin("a", "0.9.0", "input", &[]);
        fx.plugin("b", "1.0.0", "output", &[("a", ">=1.0.0")]);
        let manager = fx.manager(fx.settings()).await;

        let err = manager.load_plugin("b").await.unwrap_err();
        assert!(matches!(err, PluginError::IncompatibleVersion { .. }), "{err}");
        assert!(!manager.is_loaded("b").await);
        assert!(fx.coordinator.find("b").is_none());
    }

    #[tokio::test]
    async fn test_missing_and_failed_dependencies() {
        let fx = Fixture::new();
        fx.plugin("lonely", "1.0.0", "input", &[("ghost", "1.0.0")]);
        fx.plugin("broken", "1.0.0", "nowhere", &[]);
        fx.plugin("top", "1.0.0", "output", &[("broken", "1.0.0")]);
        let manager = fx.manager(fx.settings()).await;

        assert!(matches!(
            manager.load_plugin("lonely").await,
            Err(PluginError::MissingDependency { .. })
        ));
        assert!(matches!(
            manager.load_plugin("top").await,
            Err(PluginError::DependencyFailed { .. })
        ));
        assert!(matches!(
            manager.load_plugin("nope").await,
            Err(PluginError::NotFound(_))
        ));
        assert!(fx.coordinator.is_empty());
        assert_eq!(manager.stats().await.unsatisfied.len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_edge_is_skipped_and_reported() {
        let fx = Fixture::new();
        fx.plugin("a", "1.0.0", "input", &[("b", "1.0.0")]);
        fx.plugin("b", "1.0.0", "output", &[("a", "1.0.0")]);
        let manager = fx.manager(fx.settings()).await;

        let loaded = tokio::time::timeout(std::time::Duration::from_secs(2), manager.load_plugin("a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.name(), "a");
        assert_eq!(manager.loaded_ids().await.len(), 2);

        // b is loaded first; its edge back to a is the one skipped.
        let stats = manager.stats().await;
        assert_eq!(
            stats.cycles,
            [(PluginId::from_static("b"), PluginId::from_static("a"))]
        );
        assert!(fx.coordinator.get(ComponentKind::Input, "a").is_some());
        assert!(fx.coordinator.get(ComponentKind::Output, "b").is_some());
    }

    #[tokio::test]
    async fn test_category_must_match_kind() {
        let fx = Fixture::new();
        fx.plugin_with("bridge", "1.0.0", "connector", &[], "category = \"input\"");
        fx.plugin_with("any", "1.0.0", "connector", &[], "category = \"generic\"");
        let manager = fx.manager(fx.settings()).await;

        assert!(matches!(
            manager.load_plugin("bridge").await,
            Err(PluginError::CategoryMismatch { .. })
        ));
        manager.load_plugin("any").await.unwrap();
        assert!(fx.coordinator.get(ComponentKind::Connector, "any").is_some());
    }

    #[tokio::test]
    async fn test_load_enabled_respects_lists() {
        let fx = Fixture::new();
        fx.plugin("a", "1.0.0", "input", &[]);
        fx.plugin("b", "1.0.0", "input", &[]);
        fx.plugin_with("c", "1.0.0", "input", &[], "enabled = false");
        fx.plugin("d", "1.0.0", "nowhere", &[]);
        let mut settings = fx.settings();
        settings.disabled.insert("b".into());
        let manager = fx.manager(settings).await;

        let summary = manager.load_enabled_plugins().await;
        assert_eq!(summary.loaded, [PluginId::from_static("a")]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.skipped.len(), 2);

        let fx2 = Fixture::new();
        fx2.plugin("a", "1.0.0", "input", &[]);
        fx2.plugin("b", "1.0.0", "input", &[]);
        let mut allow = fx2.settings();
        allow.enabled.insert("b".into());
        let summary = fx2.manager(allow).await.load_enabled_plugins().await;
        assert_eq!(summary.loaded, [PluginId::from_static("b")]);
    }

    #[tokio::test]
    async fn test_disable_persists_and_unloads() {
        let fx = Fixture::new();
        fx.plugin("a", "1.0.0", "input", &[]);
        let manager = fx.manager(fx.settings()).await;
        manager.load_plugin("a").await.unwrap();

        manager.disable_plugin("a").await.unwrap();
        assert!(!manager.is_loaded("a").await);
        assert!(fx.coordinator.is_empty());
        let on_disk = PluginDescriptor::load(&fx.dir.path().join("a/plugin.toml")).unwrap();
        assert!(!on_disk.enabled);
        assert!(matches!(
            manager.load_plugin("a").await,
            Err(PluginError::Disabled(_))
        ));

        manager.enable_plugin("a").await.unwrap();
        assert!(PluginDescriptor::load(&fx.dir.path().join("a/plugin.toml")).unwrap().enabled);
        assert_eq!(manager.load_enabled_plugins().await.loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_unload_does_not_cascade() {
        let fx = Fixture::new();
        fx.plugin("a", "1.0.0", "input", &[]);
        fx.plugin("b", "1.0.0", "output", &[("a", "1.0.0")]);
        let manager = fx.manager(fx.settings()).await;
        manager.load_plugin("b").await.unwrap();

        assert!(manager.unload_plugin("a").await);
        assert!(!manager.is_loaded("a").await);
        assert!(manager.is_loaded("b").await);
        assert!(!manager.unload_plugin("a").await);
    }

    #[tokio::test]
    async fn test_schema_defaults_and_overrides_reach_component() {
        let fx = Fixture::new();
        fx.plugin_with(
            "screen",
            "1.0.0",
            "output",
            &[],
            "[config_schema.font_size]\ndefault = 24\n[config_schema.color]\ndefault = \"white\"",
        );
        let mut overrides = BTreeMap::new();
        let mut screen = Payload::new();
        screen.insert("color".into(), json!("red"));
        overrides.insert("screen".to_string(), screen);
        let manager = fx.manager(fx.settings()).await.with_component_config(overrides);

        manager.load_plugin("screen").await.unwrap();
        let config = fx.configs.lock().unwrap()["screen"].clone();
        assert_eq!(config["font_size"], json!(24));
        assert_eq!(config["color"], json!("red"));
    }

    #[tokio::test]
    async fn test_reload_picks_up_changes() {
        let fx = Fixture::new();
        fx.plugin("a", "1.0.0", "input", &[]);
        let manager = fx.manager(fx.settings()).await;
        manager.load_plugin("a").await.unwrap();

        fx.plugin("a", "1.1.0", "input", &[]);
        manager.reload_plugin("a").await.unwrap();
        assert_eq!(manager.descriptor("a").await.unwrap().version.minor, 1);
        assert_eq!(fx.coordinator.len(), 1);
    }

    #[tokio::test]
    async fn test_activate_on_load_and_builtins() {
        let fx = Fixture::new();
        let mut registry = factories(&fx.configs);
        let configs = Arc::clone(&fx.configs);
        registry.register_builtin(
            PluginDescriptor::new(
                PluginId::from_static("echo"),
                semver::Version::new(0, 1, 0),
                PluginCategory::Generic,
                "echo",
            ),
            move |d: &PluginDescriptor| {
                Ok(Box::new(Stub {
                    name: d.id.to_string(),
                    kind: ComponentKind::Connector,
                    configs: Arc::clone(&configs),
                }) as Box<dyn Component>)
            },
        );
        let mut settings = fx.settings();
        settings.activate_on_load = true;
        let manager = PluginManager::new(settings, registry, Arc::clone(&fx.coordinator));

        let summary = manager.initialize().await;
        assert_eq!(summary.loaded, [PluginId::from_static("echo")]);
        assert!(manager.loaded_component("echo").await.unwrap().is_active());
        assert_eq!(
            manager.descriptors_by_category(PluginCategory::Generic).await.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_install_and_uninstall() {
        let fx = Fixture::new();
        let manager = fx.manager(fx.settings()).await;
        let src = tempfile::tempdir().unwrap();
        std::fs::write(
            src.path().join("plugin.toml"),
            "id = \"fresh\"\nname = \"Fresh\"\nversion = \"1.0.0\"\ncategory = \"input\"\nentry_point = \"input\"\n",
        )
        .unwrap();

        manager.install(src.path()).await.unwrap();
        assert!(fx.dir.path().join("inputs/fresh/plugin.toml").is_file());
        manager.load_plugin("fresh").await.unwrap();

        assert!(manager.uninstall("fresh").await.unwrap());
        assert!(!manager.is_loaded("fresh").await);
        assert!(manager.descriptor("fresh").await.is_none());
    }
}
