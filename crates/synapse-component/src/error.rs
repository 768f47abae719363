//! Component error types.

use std::error::Error as StdError;

use synapse_fault::{Incident, IncidentKind};
use thiserror::Error;

use crate::component::{ComponentKind, LifecycleState};

/// Errors raised by components and the coordinator.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// The lifecycle state does not allow the requested operation.
    #[error("component '{component}' is {state}; cannot {operation}")]
    InvalidState {
        /// Component name.
        component: String,
        /// Current state.
        state: LifecycleState,
        /// Rejected operation.
        operation: &'static str,
    },

    /// A component with the same name is already in the group.
    #[error("{kind} component already registered: {name}")]
    AlreadyRegistered {
        /// Group.
        kind: ComponentKind,
        /// Component name.
        name: String,
    },

    /// No component with this name is in the group.
    #[error("{kind} component not registered: {name}")]
    NotRegistered {
        /// Group.
        kind: ComponentKind,
        /// Component name.
        name: String,
    },

    /// A component was handed to the registration function of another group.
    #[error("component '{name}' is an {actual} component, expected {expected}")]
    KindMismatch {
        /// Component name.
        name: String,
        /// Group the caller asked for.
        expected: ComponentKind,
        /// Kind the component reports.
        actual: ComponentKind,
    },

    /// The component does not implement the operation.
    #[error("component '{component}' does not support {operation}")]
    Unsupported {
        /// Component name.
        component: String,
        /// Missing operation.
        operation: &'static str,
    },

    /// The fault layer has quarantined the component.
    #[error("component '{0}' is quarantined")]
    Quarantined(String),

    /// Invalid component configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An event payload could not be interpreted.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Component specific failure.
    #[error("{0}")]
    Failed(String),

    /// A classified failure.
    #[error(transparent)]
    Incident(#[from] Incident),

    /// Any other error.
    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl ComponentError {
    /// Wrap an arbitrary error.
    pub fn other(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Other(error.into())
    }

    /// Box the error, unwrapping incidents so their classification survives
    /// a downcast.
    #[must_use]
    pub fn into_dyn(self) -> Box<dyn StdError + Send + Sync> {
        match self {
            Self::Incident(incident) => Box::new(incident),
            other => Box::new(other),
        }
    }

    /// Classify the error as an incident raised by `component`.
    ///
    /// Incidents keep their kind; configuration errors become
    /// [`IncidentKind::Configuration`]; everything else becomes `kind`.
    #[must_use]
    pub fn into_incident(self, component: &str, kind: IncidentKind) -> Incident {
        match self {
            Self::Incident(incident) if incident.component().is_some() => incident,
            Self::Incident(incident) => incident.with_component(component),
            Self::Config(message) => {
                Incident::new(IncidentKind::Configuration, format!("invalid configuration: {message}"))
                    .with_component(component)
                    .with_recovery_hint("check the component configuration")
            },
            Self::Other(cause) => Incident::new(kind, cause.to_string())
                .with_component(component)
                .with_boxed_cause(cause),
            other => Incident::new(kind, other.to_string()).with_component(component),
        }
    }
}

/// Result type for component operations.
pub type ComponentResult<T> = Result<T, ComponentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_incident_classification() {
        let incident = ComponentError::Config("missing room".into())
            .into_incident("chat", IncidentKind::Connector);
        assert_eq!(incident.kind(), IncidentKind::Configuration);
        assert_eq!(incident.component(), Some("chat"));

        let incident = ComponentError::Failed("boom".into())
            .into_incident("chat", IncidentKind::Connector);
        assert_eq!(incident.kind(), IncidentKind::Connector);
        assert_eq!(incident.message(), "boom");

        let typed = Incident::new(IncidentKind::Network, "reset").with_component("other");
        let incident = ComponentError::from(typed).into_incident("chat", IncidentKind::Connector);
        assert_eq!(incident.kind(), IncidentKind::Network);
        assert_eq!(incident.component(), Some("other"));
    }

    #[test]
    fn test_into_dyn_keeps_incident() {
        let boxed = ComponentError::from(Incident::new(IncidentKind::Resource, "full")).into_dyn();
        assert!(boxed.downcast::<Incident>().is_ok());

        let boxed = ComponentError::Failed("x".into()).into_dyn();
        assert!(boxed.downcast::<ComponentError>().is_ok());
    }
}
