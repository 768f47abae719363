//! Component trait and core types.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use synapse_events::Payload;
use synapse_fault::IncidentKind;

use crate::context::ComponentContext;
use crate::error::{ComponentError, ComponentResult};
use crate::receptors::Receptors;

/// Category of a component, deciding its coordinator group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Converts external data into events.
    Input,
    /// Converts events into external actions.
    Output,
    /// Bidirectional bridge to an external system.
    Connector,
}

impl ComponentKind {
    /// All kinds in activation order.
    pub const ALL: [Self; 3] = [Self::Input, Self::Output, Self::Connector];

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Connector => "connector",
        }
    }

    /// Incident kind used for failures of components in this category.
    #[must_use]
    pub fn incident_kind(self) -> IncidentKind {
        match self {
            Self::Input => IncidentKind::InputSource,
            Self::Output => IncidentKind::OutputSink,
            Self::Connector => IncidentKind::Connector,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a component.
///
/// `Constructed → Initialized → Active ⇄ Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Built, not configured yet.
    Constructed,
    /// Configured, never activated.
    Initialized,
    /// Receptors registered and internal work running.
    Active,
    /// Deactivated; may be activated again.
    Inactive,
}

impl LifecycleState {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constructed => "constructed",
            Self::Initialized => "initialized",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit with an activate/deactivate lifecycle, talking to the rest of the
/// system only through events.
///
/// Implementors provide the hooks; [`ComponentHandle`](crate::ComponentHandle)
/// drives them and owns the bookkeeping (state, subscriptions, statistics).
#[async_trait]
pub trait Component: Send + Sync {
    /// Unique name within the component's group.
    fn name(&self) -> &str;

    /// Category.
    fn kind(&self) -> ComponentKind;

    /// Apply configuration. Called before the first activation.
    async fn initialize(&mut self, _config: &Payload) -> ComponentResult<()> {
        Ok(())
    }

    /// Declare the receptors to subscribe on activation.
    fn register_receptors(&mut self, _receptors: &mut Receptors) -> ComponentResult<()> {
        Ok(())
    }

    /// Start internal work. Called after the receptors are subscribed.
    ///
    /// Background tasks should observe [`ComponentContext::cancellation`].
    async fn start(&mut self, _ctx: &ComponentContext) -> ComponentResult<()> {
        Ok(())
    }

    /// Stop internal work. Called after the receptors are unsubscribed.
    async fn stop(&mut self) -> ComponentResult<()> {
        Ok(())
    }

    /// Hand raw external data to the component.
    async fn submit(&self, _raw: Value) -> ComponentResult<()> {
        Err(ComponentError::Unsupported {
            component: self.name().to_string(),
            operation: "submit",
        })
    }
}

impl fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}
