//! Per-activation context handed to components.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use synapse_events::{Event, EventBus, Payload};
use synapse_fault::{FaultLayer, Incident};
use tokio_util::sync::CancellationToken;
use tracing::{Span, error, warn};

use crate::component::ComponentKind;
use crate::error::ComponentError;
use crate::stats::ComponentStats;

/// Tracks which activation of a component is live.
///
/// Every activation is issued a fresh generation. Contexts and emitters keep
/// the generation they were built for, so one left over from an earlier
/// activation stays inert after the component is activated again.
#[derive(Debug)]
pub(crate) struct Liveness {
    live: AtomicU64,
    issued: AtomicU64,
}

impl Liveness {
    const NONE: u64 = 0;

    pub(crate) fn new() -> Self {
        Self {
            live: AtomicU64::new(Self::NONE),
            issued: AtomicU64::new(Self::NONE),
        }
    }

    /// Reserve the generation for the next activation attempt.
    pub(crate) fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    pub(crate) fn enter(&self, generation: u64) {
        self.live.store(generation, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.live.store(Self::NONE, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.live.load(Ordering::Acquire) != Self::NONE
    }

    pub(crate) fn is_live(&self, generation: u64) -> bool {
        self.live.load(Ordering::Acquire) == generation
    }
}

/// Everything a component needs while it is active.
///
/// A fresh context (and cancellation token) is created for every activation.
#[derive(Clone)]
pub struct ComponentContext {
    name: Arc<str>,
    kind: ComponentKind,
    bus: EventBus,
    fault: Arc<FaultLayer>,
    stats: Arc<ComponentStats>,
    liveness: Arc<Liveness>,
    generation: u64,
    cancel: CancellationToken,
    span: Span,
}

impl ComponentContext {
    pub(crate) fn new(
        name: Arc<str>,
        kind: ComponentKind,
        bus: EventBus,
        fault: Arc<FaultLayer>,
        stats: Arc<ComponentStats>,
        liveness: Arc<Liveness>,
    ) -> Self {
        let generation = liveness.issue();
        let span = synapse_telemetry::component_span(&name, kind);
        Self {
            name,
            kind,
            bus,
            fault,
            stats,
            liveness,
            generation,
            cancel: CancellationToken::new(),
            span,
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

    /// The shared bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The shared fault layer.
    #[must_use]
    pub fn fault(&self) -> &Arc<FaultLayer> {
        &self.fault
    }

    /// The component's statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<ComponentStats> {
        &self.stats
    }

    /// Whether the activation this context belongs to is the live one.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.liveness.is_live(self.generation)
    }

    /// Whether the fault layer has quarantined the component.
    #[must_use]
    pub fn is_quarantined(&self) -> bool {
        self.fault.is_quarantined(&self.name)
    }

    /// Span that worker tasks and receptors of this component run in.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Token cancelled when the component is deactivated.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Publisher tagged with this component as source.
    #[must_use]
    pub fn emitter(&self) -> Emitter {
        Emitter {
            source: Arc::clone(&self.name),
            bus: self.bus.clone(),
            stats: Arc::clone(&self.stats),
            liveness: Arc::clone(&self.liveness),
            generation: self.generation,
        }
    }

    /// Count a failure and report it to the fault layer.
    pub fn report(&self, error: ComponentError) -> Incident {
        self.stats.record_error();
        let incident = error.into_incident(&self.name, self.kind.incident_kind());
        self.fault.handle(&incident);
        incident
    }

    /// Run `operation` under the fault layer's retry wrapper, classified by
    /// this component's category. A final failure counts as one error.
    ///
    /// # Errors
    ///
    /// Returns the incident of the last failed attempt.
    pub async fn guard<T, F, Fut>(&self, mut operation: F) -> Result<T, Incident>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ComponentError>>,
    {
        let result = self
            .fault
            .guard(&self.name, self.kind.incident_kind(), || {
                let attempt = operation();
                async move { attempt.await.map_err(ComponentError::into_dyn) }
            })
            .await;
        if let Err(incident) = &result {
            self.stats.record_error();
            error!(component = %self.name, "Operation failed: {incident}");
        }
        result
    }

    /// Make this context's activation the live one.
    pub(crate) fn go_live(&self) {
        self.liveness.enter(self.generation);
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Publishes events on behalf of a component.
///
/// Events are dropped unless the activation that created the emitter is
/// still live.
#[derive(Clone)]
pub struct Emitter {
    source: Arc<str>,
    bus: EventBus,
    stats: Arc<ComponentStats>,
    liveness: Arc<Liveness>,
    generation: u64,
}

impl Emitter {
    /// Source used for events built by this emitter.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Publish an event. Returns whether it was enqueued.
    pub fn publish(&self, event: Event) -> bool {
        if !self.liveness.is_live(self.generation) {
            warn!(
                component = %self.source,
                event_id = %event.id(),
                "Dropping event from inactive component"
            );
            return false;
        }
        let queued = self.bus.publish(event);
        if queued {
            self.stats.record_transmitted();
        }
        queued
    }

    /// Publish an input event.
    pub fn input(&self, payload: Payload) -> bool {
        self.publish(Event::input(self.source(), payload))
    }

    /// Publish an internal event.
    pub fn internal(&self, payload: Payload) -> bool {
        self.publish(Event::internal(self.source(), payload))
    }

    /// Publish an output event.
    pub fn output(&self, payload: Payload) -> bool {
        self.publish(Event::output(self.source(), payload))
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
