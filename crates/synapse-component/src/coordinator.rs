//! Component groups and system-wide activation ordering.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use synapse_events::EventBus;
use synapse_fault::FaultLayer;
use tracing::{debug, error, info, warn};

use crate::component::{Component, ComponentKind};
use crate::error::{ComponentError, ComponentResult};
use crate::handle::ComponentHandle;
use crate::stats::ComponentSnapshot;

#[derive(Default)]
struct Group {
    members: HashMap<String, Arc<ComponentHandle>>,
    active: BTreeSet<String>,
    activation_order: Vec<String>,
    deactivation_order: VecDeque<String>,
}

impl Group {
    fn insert(&mut self, handle: Arc<ComponentHandle>) {
        let name = handle.name().to_string();
        self.activation_order.push(name.clone());
        self.deactivation_order.push_front(name.clone());
        self.members.insert(name, handle);
    }

    fn remove(&mut self, name: &str) -> Option<Arc<ComponentHandle>> {
        let handle = self.members.remove(name)?;
        self.active.remove(name);
        self.activation_order.retain(|n| n != name);
        self.deactivation_order.retain(|n| n != name);
        Some(handle)
    }

    fn ordered(&self, names: impl Iterator<Item = String>) -> Vec<Arc<ComponentHandle>> {
        names
            .filter_map(|name| self.members.get(&name).cloned())
            .collect()
    }
}

/// One failed activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationFailure {
    /// Component name.
    pub component: String,
    /// Component category.
    pub kind: ComponentKind,
    /// Rendered error.
    pub error: String,
}

/// Outcome of [`Coordinator::activate_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    /// Components active after the call.
    pub activated: usize,
    /// Registered components.
    pub total: usize,
    /// Components that failed to activate.
    pub failures: Vec<ActivationFailure>,
}

impl ActivationReport {
    /// Whether every component activated.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.activated == self.total
    }
}

/// Snapshot of one group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    /// Registered members.
    pub members: usize,
    /// Active members.
    pub active: Vec<String>,
    /// Activation order.
    pub activation_order: Vec<String>,
    /// Deactivation order.
    pub deactivation_order: Vec<String>,
    /// Per-component view, in activation order.
    pub components: Vec<ComponentSnapshot>,
}

/// Snapshot of every group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Input group.
    pub inputs: GroupStats,
    /// Output group.
    pub outputs: GroupStats,
    /// Connector group.
    pub connectors: GroupStats,
}

/// Owns the input, output and connector groups and sequences their
/// activation.
///
/// Within a group, components activate in registration order and deactivate
/// in reverse. Across groups, inputs and outputs activate before connectors
/// and teardown is the exact reverse.
pub struct Coordinator {
    bus: EventBus,
    fault: Arc<FaultLayer>,
    inputs: Mutex<Group>,
    outputs: Mutex<Group>,
    connectors: Mutex<Group>,
}

impl Coordinator {
    /// Create a coordinator wiring components to `bus` and `fault`.
    #[must_use]
    pub fn new(bus: EventBus, fault: Arc<FaultLayer>) -> Self {
        Self {
            bus,
            fault,
            inputs: Mutex::new(Group::default()),
            outputs: Mutex::new(Group::default()),
            connectors: Mutex::new(Group::default()),
        }
    }

    /// The bus components are wired to.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The fault layer components report to.
    #[must_use]
    pub fn fault(&self) -> &Arc<FaultLayer> {
        &self.fault
    }

    /// Wrap a component in a handle wired to this coordinator's bus and fault
    /// layer.
    #[must_use]
    pub fn handle(&self, component: Box<dyn Component>) -> ComponentHandle {
        ComponentHandle::new(component, self.bus.clone(), Arc::clone(&self.fault))
    }

    /// Register a handle in the group matching its kind.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::AlreadyRegistered`] if the group already has
    /// a component with the same name.
    pub fn register(&self, handle: ComponentHandle) -> ComponentResult<Arc<ComponentHandle>> {
        match handle.kind() {
            ComponentKind::Input => self.register_input(handle),
            ComponentKind::Output => self.register_output(handle),
            ComponentKind::Connector => self.register_connector(handle),
        }
    }

    /// Register an input component.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register); also rejects other kinds.
    pub fn register_input(&self, handle: ComponentHandle) -> ComponentResult<Arc<ComponentHandle>> {
        self.insert(ComponentKind::Input, handle)
    }

    /// Register an output component.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register); also rejects other kinds.
    pub fn register_output(&self, handle: ComponentHandle) -> ComponentResult<Arc<ComponentHandle>> {
        self.insert(ComponentKind::Output, handle)
    }

    /// Register a connector.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register); also rejects other kinds.
    pub fn register_connector(
        &self,
        handle: ComponentHandle,
    ) -> ComponentResult<Arc<ComponentHandle>> {
        self.insert(ComponentKind::Connector, handle)
    }

    /// Deactivate a component and remove it from its group.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::NotRegistered`] if it is not in the group.
    pub async fn unregister(
        &self,
        kind: ComponentKind,
        name: &str,
    ) -> ComponentResult<Arc<ComponentHandle>> {
        let handle = self.get(kind, name).ok_or_else(|| not_registered(kind, name))?;
        if let Err(e) = handle.deactivate().await {
            warn!(component = %name, error = %e, "Deactivation failed during unregister");
        }
        self.group(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| not_registered(kind, name))?;
        info!(component = %name, kind = %kind, "Component unregistered");
        Ok(handle)
    }

    /// Activate one registered component.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::NotRegistered`] for unknown components, or
    /// the component's activation error.
    pub async fn activate(&self, kind: ComponentKind, name: &str) -> ComponentResult<()> {
        let handle = self.get(kind, name).ok_or_else(|| not_registered(kind, name))?;
        handle.activate().await?;
        self.group(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .insert(name.to_string());
        Ok(())
    }

    /// Deactivate one registered component. Shutdown failures are logged,
    /// not returned.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::NotRegistered`] for unknown components.
    pub async fn deactivate(&self, kind: ComponentKind, name: &str) -> ComponentResult<()> {
        let handle = self.get(kind, name).ok_or_else(|| not_registered(kind, name))?;
        if let Err(e) = handle.deactivate().await {
            error!(component = %name, error = %e, "Deactivation failed");
        }
        self.group(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .remove(name);
        Ok(())
    }

    /// Activate every group in order, continuing past failures.
    pub async fn activate_all(&self) -> ActivationReport {
        let mut report = ActivationReport::default();
        for kind in ComponentKind::ALL {
            let handles = {
                let group = self.group(kind).lock().unwrap_or_else(PoisonError::into_inner);
                group.ordered(group.activation_order.iter().cloned())
            };
            report.total = report.total.saturating_add(handles.len());
            for handle in handles {
                match self.activate(kind, handle.name()).await {
                    Ok(()) => report.activated = report.activated.saturating_add(1),
                    Err(e) => {
                        error!(component = %handle.name(), kind = %kind, error = %e, "Activation failed");
                        report.failures.push(ActivationFailure {
                            component: handle.name().to_string(),
                            kind,
                            error: e.to_string(),
                        });
                    },
                }
            }
        }
        info!(
            activated = report.activated,
            total = report.total,
            "activated {}/{} components",
            report.activated,
            report.total
        );
        report
    }

    /// Deactivate connectors, then outputs, then inputs, each group in
    /// reverse registration order.
    pub async fn deactivate_all(&self) {
        let mut deactivated: usize = 0;
        for kind in ComponentKind::ALL.into_iter().rev() {
            let handles = {
                let group = self.group(kind).lock().unwrap_or_else(PoisonError::into_inner);
                group.ordered(group.deactivation_order.iter().cloned())
            };
            for handle in handles {
                let was_active = handle.is_active();
                if self.deactivate(kind, handle.name()).await.is_ok() && was_active {
                    deactivated = deactivated.saturating_add(1);
                }
            }
        }
        info!(deactivated, "Deactivated all components");
    }

    /// Look up a component in one group.
    #[must_use]
    pub fn get(&self, kind: ComponentKind, name: &str) -> Option<Arc<ComponentHandle>> {
        self.group(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .get(name)
            .cloned()
    }

    /// Look up a component in any group.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Arc<ComponentHandle>> {
        ComponentKind::ALL
            .into_iter()
            .find_map(|kind| self.get(kind, name))
    }

    /// Names in a group, in activation order.
    #[must_use]
    pub fn names(&self, kind: ComponentKind) -> Vec<String> {
        self.group(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .activation_order
            .clone()
    }

    /// Names in a group, in deactivation order.
    #[must_use]
    pub fn deactivation_order(&self, kind: ComponentKind) -> Vec<String> {
        self.group(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deactivation_order
            .iter()
            .cloned()
            .collect()
    }

    /// Registered components across all groups.
    #[must_use]
    pub fn len(&self) -> usize {
        ComponentKind::ALL
            .into_iter()
            .map(|kind| {
                self.group(kind)
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .members
                    .len()
            })
            .sum()
    }

    /// Whether no component is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every group.
    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            inputs: self.group_stats(ComponentKind::Input).await,
            outputs: self.group_stats(ComponentKind::Output).await,
            connectors: self.group_stats(ComponentKind::Connector).await,
        }
    }

    async fn group_stats(&self, kind: ComponentKind) -> GroupStats {
        let (mut stats, handles) = {
            let group = self.group(kind).lock().unwrap_or_else(PoisonError::into_inner);
            let stats = GroupStats {
                members: group.members.len(),
                active: group.active.iter().cloned().collect(),
                activation_order: group.activation_order.clone(),
                deactivation_order: group.deactivation_order.iter().cloned().collect(),
                components: Vec::new(),
            };
            (stats, group.ordered(group.activation_order.iter().cloned()))
        };
        for handle in handles {
            stats.components.push(handle.snapshot().await);
        }
        stats
    }

    fn insert(
        &self,
        kind: ComponentKind,
        handle: ComponentHandle,
    ) -> ComponentResult<Arc<ComponentHandle>> {
        if handle.kind() != kind {
            return Err(ComponentError::KindMismatch {
                name: handle.name().to_string(),
                expected: kind,
                actual: handle.kind(),
            });
        }
        let mut group = self.group(kind).lock().unwrap_or_else(PoisonError::into_inner);
        if group.members.contains_key(handle.name()) {
            return Err(ComponentError::AlreadyRegistered {
                kind,
                name: handle.name().to_string(),
            });
        }
        let handle = Arc::new(handle);
        group.insert(Arc::clone(&handle));
        debug!(component = %handle.name(), kind = %kind, "Component registered");
        Ok(handle)
    }

    fn group(&self, kind: ComponentKind) -> &Mutex<Group> {
        match kind {
            ComponentKind::Input => &self.inputs,
            ComponentKind::Output => &self.outputs,
            ComponentKind::Connector => &self.connectors,
        }
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("inputs", &self.names(ComponentKind::Input))
            .field("outputs", &self.names(ComponentKind::Output))
            .field("connectors", &self.names(ComponentKind::Connector))
            .finish_non_exhaustive()
    }
}

fn not_registered(kind: ComponentKind, name: &str) -> ComponentError {
    ComponentError::NotRegistered {
        kind,
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ComponentContext;
    use async_trait::async_trait;
    use synapse_events::Payload;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Probe {
        name: String,
        kind: ComponentKind,
        journal: Journal,
        fail_start: bool,
        fail_stop: bool,
    }

    impl Probe {
        fn boxed(name: &str, kind: ComponentKind, journal: &Journal) -> Box<dyn Component> {
            Box::new(Self {
                name: name.to_string(),
                kind,
                journal: Arc::clone(journal),
                fail_start: false,
                fail_stop: false,
            })
        }
    }

    #[async_trait]
    impl Component for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ComponentKind {
            self.kind
        }

        async fn start(&mut self, _ctx: &ComponentContext) -> ComponentResult<()> {
            if self.fail_start {
                return Err(ComponentError::Failed("no device".into()));
            }
            self.journal.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        async fn stop(&mut self) -> ComponentResult<()> {
            self.journal.lock().unwrap().push(format!("stop {}", self.name));
            if self.fail_stop {
                return Err(ComponentError::Failed("stuck".into()));
            }
            Ok(())
        }
    }

    async fn register(coordinator: &Coordinator, component: Box<dyn Component>) {
        let handle = coordinator.handle(component);
        handle.initialize(&Payload::new()).await.unwrap();
        coordinator.register(handle).unwrap();
    }

    fn coordinator() -> Coordinator {
        Coordinator::new(EventBus::new(), Arc::new(FaultLayer::default()))
    }

    #[tokio::test]
    async fn test_cross_group_ordering() {
        let coordinator = coordinator();
        let journal = Journal::default();
        register(&coordinator, Probe::boxed("bridge", ComponentKind::Connector, &journal)).await;
        register(&coordinator, Probe::boxed("screen", ComponentKind::Output, &journal)).await;
        register(&coordinator, Probe::boxed("chat", ComponentKind::Input, &journal)).await;
        register(&coordinator, Probe::boxed("console", ComponentKind::Input, &journal)).await;

        let report = coordinator.activate_all().await;
        assert!(report.is_complete());
        assert_eq!(report.total, 4);

        coordinator.deactivate_all().await;
        let journal = journal.lock().unwrap().clone();
        assert_eq!(
            journal,
            [
                "start chat",
                "start console",
                "start screen",
                "start bridge",
                "stop bridge",
                "stop screen",
                "stop console",
                "stop chat",
            ]
        );
    }

    #[tokio::test]
    async fn test_deactivation_order_is_reverse_for_any_n() {
        for n in 0..6 {
            let coordinator = coordinator();
            let journal = Journal::default();
            for i in 0..n {
                register(&coordinator, Probe::boxed(&format!("c{i}"), ComponentKind::Output, &journal)).await;
            }
            let mut expected = coordinator.names(ComponentKind::Output);
            expected.reverse();
            assert_eq!(coordinator.deactivation_order(ComponentKind::Output), expected);

            coordinator.activate_all().await;
            journal.lock().unwrap().clear();
            coordinator.deactivate_all().await;
            let stops: Vec<String> = journal
                .lock()
                .unwrap()
                .iter()
                .map(|entry| entry.trim_start_matches("stop ").to_string())
                .collect();
            assert_eq!(stops, expected);
        }
    }

    #[tokio::test]
    async fn test_activate_all_continues_past_failures() {
        let coordinator = coordinator();
        let journal = Journal::default();
        register(&coordinator, Probe::boxed("a", ComponentKind::Input, &journal)).await;
        let broken = Box::new(Probe {
            name: "b".into(),
            kind: ComponentKind::Input,
            journal: Arc::clone(&journal),
            fail_start: true,
            fail_stop: false,
        });
        register(&coordinator, broken).await;
        register(&coordinator, Probe::boxed("c", ComponentKind::Input, &journal)).await;

        let report = coordinator.activate_all().await;
        assert_eq!(report.activated, 2);
        assert_eq!(report.total, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].component, "b");
        assert!(!report.is_complete());

        let stats = coordinator.stats().await;
        assert_eq!(stats.inputs.active, ["a", "c"]);
        assert_eq!(stats.inputs.members, 3);
    }

    #[tokio::test]
    async fn test_deactivate_swallows_shutdown_failure() {
        let coordinator = coordinator();
        let journal = Journal::default();
        let stuck = Box::new(Probe {
            name: "stuck".into(),
            kind: ComponentKind::Output,
            journal: Arc::clone(&journal),
            fail_start: false,
            fail_stop: true,
        });
        register(&coordinator, stuck).await;
        coordinator.activate(ComponentKind::Output, "stuck").await.unwrap();
        coordinator.deactivate(ComponentKind::Output, "stuck").await.unwrap();
        assert!(!coordinator.find("stuck").unwrap().is_active());
    }

    #[tokio::test]
    async fn test_registration_errors() {
        let coordinator = coordinator();
        let journal = Journal::default();
        register(&coordinator, Probe::boxed("chat", ComponentKind::Input, &journal)).await;

        let duplicate = coordinator.handle(Probe::boxed("chat", ComponentKind::Input, &journal));
        assert!(matches!(
            coordinator.register(duplicate),
            Err(ComponentError::AlreadyRegistered { .. })
        ));

        // Same name in another group is fine.
        let other = coordinator.handle(Probe::boxed("chat", ComponentKind::Connector, &journal));
        coordinator.register(other).unwrap();

        let wrong = coordinator.handle(Probe::boxed("x", ComponentKind::Output, &journal));
        assert!(matches!(
            coordinator.register_input(wrong),
            Err(ComponentError::KindMismatch { expected: ComponentKind::Input, .. })
        ));

        assert!(matches!(
            coordinator.activate(ComponentKind::Output, "ghost").await,
            Err(ComponentError::NotRegistered { .. })
        ));
        assert_eq!(coordinator.len(), 2);
    }

    #[tokio::test]
    async fn test_unregister_deactivates_first() {
        let coordinator = coordinator();
        let journal = Journal::default();
        register(&coordinator, Probe::boxed("screen", ComponentKind::Output, &journal)).await;
        coordinator.activate(ComponentKind::Output, "screen").await.unwrap();

        let handle = coordinator.unregister(ComponentKind::Output, "screen").await.unwrap();
        assert!(!handle.is_active());
        assert!(coordinator.find("screen").is_none());
        assert!(coordinator.is_empty());
        assert_eq!(journal.lock().unwrap().last().map(String::as_str), Some("stop screen"));
    }
}
