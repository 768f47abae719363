//! The runtime: wires the bus, fault layer, coordinator, plugin manager and
//! health monitor together and drives startup and shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use synapse_component::{ActivationReport, ComponentHandle, CoordinatorStats};
use synapse_config::Config;
use synapse_events::{BusStats, Event, EventBus, Payload};
use synapse_fault::{
    CheckReport, FaultLayer, FaultResult, FaultSettings, FaultStats, HealthCheck, HealthMonitor,
    HealthStatus, RecoveryPolicy, component_health_check,
};
use synapse_plugins::{FactoryRegistry, LoadSummary, PluginManager, PluginSettings, PluginStats};
use tracing::{debug, error, info, warn};

use crate::config_bridge;
use crate::context::RuntimeContext;
use crate::error::{RuntimeError, RuntimeResult};

/// Source name of the runtime's own system events.
pub const RUNTIME_SOURCE: &str = "runtime";

/// Everything the runtime needs besides its factories.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Fault layer tuning.
    pub fault: FaultSettings,
    /// Recovery policies applied on start, by component name.
    pub policies: BTreeMap<String, RecoveryPolicy>,
    /// Health monitor tick. `None` disables the monitor.
    pub monitor_interval: Option<Duration>,
    /// Queue depth at which the bus warns. Zero disables the warning.
    pub queue_warn_depth: usize,
    /// Plugin manager settings.
    pub plugins: PluginSettings,
    /// Per-plugin component configuration, by plugin id.
    pub component_config: BTreeMap<String, Payload>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            fault: FaultSettings::default(),
            policies: BTreeMap::new(),
            monitor_interval: Some(Duration::from_secs(30)),
            queue_warn_depth: 1000,
            plugins: PluginSettings::default(),
            component_config: BTreeMap::new(),
        }
    }
}

/// Outcome of [`Runtime::start`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReport {
    /// Automatic plugin loading.
    pub plugins: LoadSummary,
    /// Component activation.
    pub activation: ActivationReport,
}

/// Snapshot of the whole runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStats {
    /// Whether the runtime is started.
    pub running: bool,
    /// Bus counters.
    pub bus: BusStats,
    /// Fault layer state.
    pub fault: FaultStats,
    /// Component groups.
    pub coordinator: CoordinatorStats,
    /// Plugin manager state.
    pub plugins: PluginStats,
    /// Latest health check reports. Empty without a monitor.
    pub health: Vec<CheckReport>,
}

/// A configured Synapse runtime.
///
/// Nothing runs until [`start`](Self::start). A runtime can be started again
/// after [`shutdown`](Self::shutdown); loaded plugins stay registered in
/// between and are re-activated.
pub struct Runtime {
    context: RuntimeContext,
    plugins: PluginManager,
    policies: BTreeMap<String, RecoveryPolicy>,
    monitor: Option<HealthMonitor>,
    running: AtomicBool,
}

impl Runtime {
    /// Build a runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Fault`] if the fault settings are invalid.
    pub fn new(settings: RuntimeSettings, factories: FactoryRegistry) -> RuntimeResult<Self> {
        settings.fault.validate()?;

        let bus = EventBus::with_queue_warn_depth(settings.queue_warn_depth);
        let fault = Arc::new(FaultLayer::new(settings.fault));
        let context = RuntimeContext::new(bus, fault);

        let monitor = settings
            .monitor_interval
            .map(|tick| build_monitor(tick, &context, settings.queue_warn_depth))
            .transpose()?;

        let plugins = PluginManager::new(
            settings.plugins,
            factories,
            Arc::clone(&context.coordinator),
        )
        .with_component_config(settings.component_config);

        debug!(
            policies = settings.policies.len(),
            monitor = monitor.is_some(),
            "Runtime created"
        );

        Ok(Self {
            context,
            plugins,
            policies: settings.policies,
            monitor,
            running: AtomicBool::new(false),
        })
    }

    /// Build a runtime from a loaded configuration.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_config(config: &Config, factories: FactoryRegistry) -> RuntimeResult<Self> {
        Self::new(config_bridge::to_runtime_settings(config), factories)
    }

    /// Start the bus, apply recovery policies, start the health monitor,
    /// load enabled plugins and activate every component.
    ///
    /// Plugin and activation failures are reported, not returned.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AlreadyRunning`] if already started.
    pub async fn start(&self) -> RuntimeResult<StartReport> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyRunning);
        }
        info!("Starting runtime");

        self.context.bus.start();
        for (component, policy) in &self.policies {
            self.context.fault.set_policy(component.clone(), policy.clone());
        }
        if let Some(monitor) = &self.monitor {
            monitor.start();
        }

        let plugins = self.plugins.initialize().await;
        let activation = self.context.coordinator.activate_all().await;
        if !activation.is_complete() {
            warn!(
                activated = activation.activated,
                total = activation.total,
                "Not every component activated"
            );
        }

        self.announce(
            "runtime.started",
            [
                ("plugins_loaded", json!(plugins.loaded.len())),
                ("plugins_failed", json!(plugins.failed.len())),
                ("components_active", json!(activation.activated)),
                ("components_total", json!(activation.total)),
            ],
        );
        info!(
            plugins = plugins.loaded.len(),
            active = activation.activated,
            total = activation.total,
            "Runtime started"
        );
        Ok(StartReport {
            plugins,
            activation,
        })
    }

    /// Announce shutdown, deactivate every component in reverse order, then
    /// stop the monitor and the bus. A stopped runtime is left alone.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            debug!("Runtime not running");
            return;
        }
        info!("Shutting down runtime");

        self.context
            .bus
            .publish_now(lifecycle_event("runtime.stopping", []))
            .await;
        self.context.coordinator.deactivate_all().await;
        if let Some(monitor) = &self.monitor {
            monitor.stop().await;
        }
        self.context.bus.stop().await;
        info!("Runtime stopped");
    }

    /// Load a plugin with its dependencies and, while running, activate it.
    ///
    /// # Errors
    ///
    /// Returns the plugin's load error or the component's activation error.
    pub async fn hot_load(&self, id: &str) -> RuntimeResult<Arc<ComponentHandle>> {
        let handle = self.plugins.load_plugin(id).await?;
        if self.is_running() && !handle.is_active() {
            self.context
                .coordinator
                .activate(handle.kind(), handle.name())
                .await?;
        }
        info!(plugin_id = %id, component = %handle.name(), "Plugin hot-loaded");
        self.announce("plugin.loaded", [("plugin_id", json!(id))]);
        Ok(handle)
    }

    /// Deactivate and remove a loaded plugin. Returns `false` if it was not
    /// loaded.
    pub async fn hot_unload(&self, id: &str) -> bool {
        let unloaded = self.plugins.unload_plugin(id).await;
        if unloaded {
            info!(plugin_id = %id, "Plugin hot-unloaded");
            self.announce("plugin.unloaded", [("plugin_id", json!(id))]);
        }
        unloaded
    }

    /// Unload, re-discover and load a plugin again, re-activating it if it
    /// was active.
    ///
    /// # Errors
    ///
    /// Returns the load or activation error. The plugin stays unloaded if
    /// loading fails.
    pub async fn reload(&self, id: &str) -> RuntimeResult<Arc<ComponentHandle>> {
        let was_active = self
            .plugins
            .loaded_component(id)
            .await
            .is_some_and(|handle| handle.is_active());
        let handle = self.plugins.reload_plugin(id).await?;
        if was_active && !handle.is_active() {
            self.context
                .coordinator
                .activate(handle.kind(), handle.name())
                .await?;
        }
        info!(plugin_id = %id, reactivated = was_active, "Plugin reloaded");
        self.announce("plugin.reloaded", [("plugin_id", json!(id))]);
        Ok(handle)
    }

    /// Whether the runtime is started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Shared handles.
    #[must_use]
    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    /// The event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.context.bus
    }

    /// The fault layer.
    #[must_use]
    pub fn fault(&self) -> &Arc<FaultLayer> {
        &self.context.fault
    }

    /// The plugin manager.
    #[must_use]
    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// The health monitor, if enabled.
    #[must_use]
    pub fn monitor(&self) -> Option<&HealthMonitor> {
        self.monitor.as_ref()
    }

    /// Snapshot of every subsystem.
    pub async fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            running: self.is_running(),
            bus: self.context.bus.stats(),
            fault: self.context.fault.stats(),
            coordinator: self.context.coordinator.stats().await,
            plugins: self.plugins.stats().await,
            health: self
                .monitor
                .as_ref()
                .map(HealthMonitor::status)
                .unwrap_or_default(),
        }
    }

    fn announce<const N: usize>(&self, name: &str, fields: [(&str, Value); N]) {
        self.context.bus.publish(lifecycle_event(name, fields));
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("running", &self.is_running())
            .field("coordinator", &self.context.coordinator)
            .field("policies", &self.policies.keys().collect::<Vec<_>>())
            .field("monitor", &self.monitor.is_some())
            .finish_non_exhaustive()
    }
}

fn lifecycle_event<const N: usize>(name: &str, fields: [(&str, Value); N]) -> Event {
    let mut payload = Payload::new();
    payload.insert("event".into(), Value::String(name.to_string()));
    for (key, value) in fields {
        payload.insert(key.to_string(), value);
    }
    Event::system(RUNTIME_SOURCE, payload)
}

fn build_monitor(
    tick: Duration,
    context: &RuntimeContext,
    queue_warn_depth: usize,
) -> FaultResult<HealthMonitor> {
    let monitor = HealthMonitor::new(tick).with_fault_layer(Arc::clone(&context.fault));
    monitor.register(component_health_check(Arc::clone(&context.fault)))?;

    let bus = context.bus.clone();
    monitor.register(
        HealthCheck::new("event_bus", move || {
            let queued = bus.queue_len();
            if !bus.is_running() {
                (HealthStatus::Critical, "event bus stopped".to_string())
            } else if queue_warn_depth > 0 && queued >= queue_warn_depth {
                (HealthStatus::Warning, format!("{queued} events queued"))
            } else {
                (HealthStatus::Healthy, format!("{queued} events queued"))
            }
        })
        .with_description("Event bus worker and queue depth")
        .with_interval(tick),
    )?;

    monitor.add_listener(|check, status, message| match status {
        HealthStatus::Critical => error!(check, message, "Health check critical"),
        HealthStatus::Warning => warn!(check, message, "Health check warning"),
        HealthStatus::Healthy | HealthStatus::Unknown => {
            debug!(check, ?status, message, "Health check ran");
        },
    });
    Ok(monitor)
}
