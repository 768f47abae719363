//! Incident taxonomy.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of incident categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// An input component failed to read or convert external data.
    InputSource,
    /// An output component failed to perform an external action.
    OutputSink,
    /// A connector failed talking to its external system.
    Connector,
    /// Network level failure.
    Network,
    /// Invalid or missing configuration.
    Configuration,
    /// Exhausted or unavailable resource.
    Resource,
    /// Runtime level failure.
    System,
    /// Anything not classified.
    Unknown,
}

impl IncidentKind {
    /// Snake-case name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputSource => "input_source",
            Self::OutputSink => "output_sink",
            Self::Connector => "connector",
            Self::Network => "network",
            Self::Configuration => "configuration",
            Self::Resource => "resource",
            Self::System => "system",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure.
///
/// `Incident` is itself an error type, so component operations can return it
/// directly and the guard wrapper will keep its classification.
#[derive(Clone)]
pub struct Incident {
    kind: IncidentKind,
    message: String,
    component: Option<String>,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
    recovery_hint: Option<String>,
    timestamp: DateTime<Utc>,
}

impl Incident {
    /// Create an incident of the given kind.
    #[must_use]
    pub fn new(kind: IncidentKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            component: None,
            cause: None,
            recovery_hint: None,
            timestamp: Utc::now(),
        }
    }

    /// Name the component the incident originated from.
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Attach the underlying error.
    #[must_use]
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Attach an already boxed underlying error.
    #[must_use]
    pub fn with_boxed_cause(mut self, cause: Box<dyn StdError + Send + Sync>) -> Self {
        self.cause = Some(Arc::from(cause));
        self
    }

    /// Attach a hint telling operators how to recover.
    #[must_use]
    pub fn with_recovery_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hint = Some(hint.into());
        self
    }

    /// Category.
    #[must_use]
    pub fn kind(&self) -> IncidentKind {
        self.kind
    }

    /// Message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Originating component, if known.
    #[must_use]
    pub fn component(&self) -> Option<&str> {
        self.component.as_deref()
    }

    /// Recovery hint, if any.
    #[must_use]
    pub fn recovery_hint(&self) -> Option<&str> {
        self.recovery_hint.as_deref()
    }

    /// When the incident was created.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub(crate) fn set_component_if_missing(&mut self, component: &str) {
        if self.component.is_none() {
            self.component = Some(component.to_string());
        }
    }

    /// Serializable snapshot.
    #[must_use]
    pub fn to_record(&self) -> IncidentRecord {
        IncidentRecord {
            kind: self.kind,
            message: self.message.clone(),
            component: self.component.clone(),
            cause: self.cause.as_ref().map(ToString::to_string),
            recovery_hint: self.recovery_hint.clone(),
            timestamp: self.timestamp,
        }
    }
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.kind)?;
        if let Some(component) = &self.component {
            write!(f, "{component}: ")?;
        }
        f.write_str(&self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incident")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("component", &self.component)
            .field("cause", &self.cause.as_ref().map(ToString::to_string))
            .field("recovery_hint", &self.recovery_hint)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl StdError for Incident {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Serializable form of an [`Incident`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    /// Category.
    pub kind: IncidentKind,
    /// Message.
    pub message: String,
    /// Originating component.
    pub component: Option<String>,
    /// Rendered cause.
    pub cause: Option<String>,
    /// Recovery hint.
    pub recovery_hint: Option<String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}
