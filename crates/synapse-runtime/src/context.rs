//! Shared runtime handles.

use std::sync::Arc;

use synapse_component::Coordinator;
use synapse_events::EventBus;
use synapse_fault::FaultLayer;

/// The bus, fault layer and coordinator of one runtime.
///
/// Cloning is cheap; every clone refers to the same instances. Subsystems
/// receive a context instead of reaching for process-wide singletons.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// The event bus.
    pub bus: EventBus,
    /// The fault layer.
    pub fault: Arc<FaultLayer>,
    /// The component coordinator.
    pub coordinator: Arc<Coordinator>,
}

impl RuntimeContext {
    /// Build a context around an existing bus and fault layer.
    #[must_use]
    pub fn new(bus: EventBus, fault: Arc<FaultLayer>) -> Self {
        let coordinator = Arc::new(Coordinator::new(bus.clone(), Arc::clone(&fault)));
        Self {
            bus,
            fault,
            coordinator,
        }
    }
}
