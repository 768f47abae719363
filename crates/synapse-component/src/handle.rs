//! Lifecycle driver for a single component.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use synapse_events::{EventBus, Payload, SubscriptionId};
use synapse_fault::FaultLayer;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::component::{Component, ComponentKind, LifecycleState};
use crate::context::{ComponentContext, Liveness};
use crate::error::{ComponentError, ComponentResult};
use crate::receptors::Receptors;
use crate::stats::{ComponentSnapshot, ComponentStats};

struct Slot {
    component: Box<dyn Component>,
    state: LifecycleState,
    subscriptions: Vec<SubscriptionId>,
    context: Option<ComponentContext>,
}

/// Owns a component and drives it through its lifecycle.
///
/// Lifecycle operations are serialized; whether the component is active is
/// readable without waiting for them.
pub struct ComponentHandle {
    name: Arc<str>,
    kind: ComponentKind,
    bus: EventBus,
    fault: Arc<FaultLayer>,
    stats: Arc<ComponentStats>,
    liveness: Arc<Liveness>,
    slot: Mutex<Slot>,
}

impl ComponentHandle {
    /// Wrap a constructed component.
    #[must_use]
    pub fn new(component: Box<dyn Component>, bus: EventBus, fault: Arc<FaultLayer>) -> Self {
        Self {
            name: Arc::from(component.name()),
            kind: component.kind(),
            bus,
            fault,
            stats: Arc::new(ComponentStats::default()),
            liveness: Arc::new(Liveness::new()),
            slot: Mutex::new(Slot {
                component,
                state: LifecycleState::Constructed,
                subscriptions: Vec::new(),
                context: None,
            }),
        }
    }

    /// Component name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Component category.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Whether the component is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.liveness.is_active()
    }

    /// Live statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<ComponentStats> {
        &self.stats
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> LifecycleState {
        self.slot.lock().await.state
    }

    /// Subscriptions currently owned by the component.
    pub async fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.slot.lock().await.subscriptions.clone()
    }

    /// Serializable view of the component.
    pub async fn snapshot(&self) -> ComponentSnapshot {
        let slot = self.slot.lock().await;
        self.stats
            .snapshot(&self.name, self.kind, slot.state, slot.subscriptions.len())
    }

    /// Configure the component.
    ///
    /// May be repeated until the first activation.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] once the component has been
    /// activated, or the component's own initialization error.
    pub async fn initialize(&self, config: &Payload) -> ComponentResult<()> {
        let mut slot = self.slot.lock().await;
        if !matches!(
            slot.state,
            LifecycleState::Constructed | LifecycleState::Initialized
        ) {
            return Err(self.invalid_state(slot.state, "initialize"));
        }
        slot.component.initialize(config).await?;
        slot.state = LifecycleState::Initialized;
        debug!(component = %self.name, kind = %self.kind, "Component initialized");
        Ok(())
    }

    /// Register the component's receptors, start it and mark it active.
    ///
    /// Activating an active component is a no-op. If registration or startup
    /// fails, the subscriptions made during this attempt are removed again and
    /// the component keeps its previous state.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] if the component was never
    /// initialized, or the component's own registration or startup error.
    pub async fn activate(&self) -> ComponentResult<()> {
        let mut slot = self.slot.lock().await;
        match slot.state {
            LifecycleState::Active => {
                warn!(component = %self.name, "Component already active");
                return Ok(());
            },
            LifecycleState::Constructed => {
                return Err(self.invalid_state(slot.state, "activate"));
            },
            LifecycleState::Initialized | LifecycleState::Inactive => {},
        }

        let ctx = ComponentContext::new(
            Arc::clone(&self.name),
            self.kind,
            self.bus.clone(),
            Arc::clone(&self.fault),
            Arc::clone(&self.stats),
            Arc::clone(&self.liveness),
        );

        let mut receptors = Receptors::new(ctx.clone());
        if let Err(e) = slot.component.register_receptors(&mut receptors) {
            ctx.cancel();
            error!(component = %self.name, error = %e, "Receptor registration failed");
            return Err(e);
        }
        let subscriptions: Vec<SubscriptionId> = receptors
            .into_pending()
            .into_iter()
            .map(|receptor| self.bus.subscribe(receptor))
            .collect();

        if let Err(e) = slot.component.start(&ctx).await {
            ctx.cancel();
            let removed = subscriptions
                .iter()
                .filter(|id| self.bus.unsubscribe(**id))
                .count();
            error!(
                component = %self.name,
                error = %e,
                rolled_back = removed,
                "Component startup failed"
            );
            return Err(e);
        }

        slot.subscriptions = subscriptions;
        ctx.go_live();
        slot.context = Some(ctx);
        slot.state = LifecycleState::Active;
        info!(
            component = %self.name,
            kind = %self.kind,
            receptors = slot.subscriptions.len(),
            "Component activated"
        );
        Ok(())
    }

    /// Unsubscribe every owned receptor, then stop the component.
    ///
    /// The subscriptions are always removed and the component always ends up
    /// inactive, even when its own shutdown fails.
    ///
    /// # Errors
    ///
    /// Returns the component's shutdown error after the bookkeeping is done.
    pub async fn deactivate(&self) -> ComponentResult<()> {
        let mut slot = self.slot.lock().await;
        if slot.state != LifecycleState::Active {
            debug!(component = %self.name, state = %slot.state, "Component not active");
            return Ok(());
        }

        self.liveness.clear();
        for id in std::mem::take(&mut slot.subscriptions) {
            if !self.bus.unsubscribe(id) {
                debug!(component = %self.name, subscription = %id, "Subscription already gone");
            }
        }
        if let Some(ctx) = slot.context.take() {
            ctx.cancel();
        }
        slot.state = LifecycleState::Inactive;

        match slot.component.stop().await {
            Ok(()) => {
                info!(component = %self.name, "Component deactivated");
                Ok(())
            },
            Err(e) => {
                error!(component = %self.name, error = %e, "Component shutdown failed");
                Err(e)
            },
        }
    }

    /// Hand raw external data to an active component.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] if the component is not
    /// active, [`ComponentError::Quarantined`] if the fault layer isolated it,
    /// or the component's own error.
    pub async fn submit(&self, raw: Value) -> ComponentResult<()> {
        let slot = self.slot.lock().await;
        if slot.state != LifecycleState::Active {
            return Err(self.invalid_state(slot.state, "submit"));
        }
        if self.fault.is_quarantined(&self.name) {
            warn!(component = %self.name, "Rejecting input for quarantined component");
            return Err(ComponentError::Quarantined(self.name.to_string()));
        }
        slot.component.submit(raw).await
    }

    fn invalid_state(&self, state: LifecycleState, operation: &'static str) -> ComponentError {
        ComponentError::InvalidState {
            component: self.name.to_string(),
            state,
            operation,
        }
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::context::Emitter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use synapse_events::{Event, EventFilter, EventKind};

    #[derive(Default)]
    struct Probe {
        receptors: usize,
        fail_start: bool,
        fail_stop: bool,
        seen: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
        emitters: Arc<std::sync::Mutex<Vec<Emitter>>>,
    }

    #[async_trait]
    impl Component for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn kind(&self) -> ComponentKind {
            ComponentKind::Output
        }

        fn register_receptors(&mut self, receptors: &mut Receptors) -> ComponentResult<()> {
            for i in 0..self.receptors {
                let seen = Arc::clone(&self.seen);
                receptors.on(
                    &format!("r{i}"),
                    EventFilter::new().kinds([EventKind::Output]),
                    move |_| {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                );
            }
            Ok(())
        }

        async fn start(&mut self, ctx: &ComponentContext) -> ComponentResult<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.emitters.lock().unwrap().push(ctx.emitter());
            if self.fail_start {
                return Err(ComponentError::Failed("device missing".into()));
            }
            Ok(())
        }

        async fn stop(&mut self) -> ComponentResult<()> {
            if self.fail_stop {
                return Err(ComponentError::Failed("stuck".into()));
            }
            Ok(())
        }
    }

    fn handle(probe: Probe) -> (ComponentHandle, EventBus) {
        let bus = EventBus::new();
        let handle = ComponentHandle::new(Box::new(probe), bus.clone(), Arc::new(FaultLayer::default()));
        (handle, bus)
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let seen = Arc::new(AtomicUsize::new(0));
        let (handle, bus) = handle(Probe {
            receptors: 2,
            seen: Arc::clone(&seen),
            ..Probe::default()
        });
        assert_eq!(handle.state().await, LifecycleState::Constructed);
        assert!(matches!(
            handle.activate().await,
            Err(ComponentError::InvalidState { operation: "activate", .. })
        ));

        handle.initialize(&Payload::new()).await.unwrap();
        handle.activate().await.unwrap();
        assert!(handle.is_active());
        assert_eq!(bus.receptor_count(), 2);

        bus.publish_now(Event::output("cmd", Payload::new())).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        handle.deactivate().await.unwrap();
        assert_eq!(handle.state().await, LifecycleState::Inactive);
        assert_eq!(bus.receptor_count(), 0);
        bus.publish_now(Event::output("cmd", Payload::new())).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        // Inactive components can be activated again.
        handle.activate().await.unwrap();
        assert_eq!(bus.receptor_count(), 2);
    }

    #[tokio::test]
    async fn test_double_activation_is_noop() {
        let started = Arc::new(AtomicUsize::new(0));
        let (handle, bus) = handle(Probe {
            receptors: 1,
            started: Arc::clone(&started),
            ..Probe::default()
        });
        handle.initialize(&Payload::new()).await.unwrap();
        handle.activate().await.unwrap();
        handle.activate().await.unwrap();
        assert_eq!(bus.receptor_count(), 1);
        assert_eq!(handle.subscriptions().await.len(), 1);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back() {
        let (handle, bus) = handle(Probe {
            receptors: 3,
            fail_start: true,
            ..Probe::default()
        });
        handle.initialize(&Payload::new()).await.unwrap();
        let err = handle.activate().await.unwrap_err();
        assert_eq!(err.to_string(), "device missing");
        assert_eq!(bus.receptor_count(), 0);
        assert!(!handle.is_active());
        assert_eq!(handle.state().await, LifecycleState::Initialized);
        assert!(handle.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_stop_still_clears_subscriptions() {
        let (handle, bus) = handle(Probe {
            receptors: 2,
            fail_stop: true,
            ..Probe::default()
        });
        handle.initialize(&Payload::new()).await.unwrap();
        handle.activate().await.unwrap();

        assert!(handle.deactivate().await.is_err());
        assert!(handle.subscriptions().await.is_empty());
        assert_eq!(bus.receptor_count(), 0);
        assert_eq!(handle.state().await, LifecycleState::Inactive);
    }

    #[tokio::test]
    async fn test_no_reinitialize_after_activation() {
        let (handle, _bus) = handle(Probe::default());
        handle.initialize(&Payload::new()).await.unwrap();
        handle.initialize(&Payload::new()).await.unwrap();
        handle.activate().await.unwrap();
        handle.deactivate().await.unwrap();
        assert!(matches!(
            handle.initialize(&Payload::new()).await,
            Err(ComponentError::InvalidState { state: LifecycleState::Inactive, .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_requires_active_and_support() {
        let (handle, _bus) = handle(Probe::default());
        handle.initialize(&Payload::new()).await.unwrap();
        assert!(matches!(
            handle.submit(Value::Null).await,
            Err(ComponentError::InvalidState { .. })
        ));
        handle.activate().await.unwrap();
        assert!(matches!(
            handle.submit(Value::Null).await,
            Err(ComponentError::Unsupported { operation: "submit", .. })
        ));
    }

    #[tokio::test]
    async fn test_snapshot() {
        let (handle, _bus) = handle(Probe {
            receptors: 1,
            ..Probe::default()
        });
        handle.initialize(&Payload::new()).await.unwrap();
        handle.activate().await.unwrap();
        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.name, "probe");
        assert_eq!(snapshot.kind, ComponentKind::Output);
        assert_eq!(snapshot.state, LifecycleState::Active);
        assert_eq!(snapshot.subscriptions, 1);
    }

    #[tokio::test]
    async fn test_emitter_from_previous_activation_is_inert() {
        let emitters = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (handle, bus) = handle(Probe {
            emitters: Arc::clone(&emitters),
            ..Probe::default()
        });
        bus.start();
        handle.initialize(&Payload::new()).await.unwrap();
        handle.activate().await.unwrap();
        handle.deactivate().await.unwrap();
        handle.activate().await.unwrap();

        let (stale, current) = {
            let emitters = emitters.lock().unwrap();
            (emitters[0].clone(), emitters[1].clone())
        };
        assert!(!stale.output(Payload::new()));
        assert!(current.output(Payload::new()));
        assert_eq!(handle.stats().transmitted(), 1);
        bus.stop().await;
    }
}
