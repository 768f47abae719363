//! The event record carried on the bus.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::EventResult;

/// Structured event payload.
pub type Payload = serde_json::Map<String, Value>;

/// Logical type of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Produced by input components from external data.
    Input,
    /// Exchanged between components while processing.
    Internal,
    /// Directed at output components to cause an external effect.
    Output,
    /// Runtime management and control.
    System,
}

impl EventKind {
    /// All kinds in declaration order.
    pub const ALL: [Self; 4] = [Self::Input, Self::Internal, Self::Output, Self::System];

    /// Lowercase name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Internal => "internal",
            Self::Output => "output",
            Self::System => "system",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event priority, ordered from `Low` to `Urgent`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background information.
    Low,
    /// Regular traffic.
    #[default]
    Normal,
    /// Should be handled ahead of normal traffic.
    High,
    /// Must be handled immediately.
    Urgent,
}

impl Priority {
    /// Lowercase name of the priority.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an event's processing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    /// Identifier of the handler that touched the event.
    pub handler: String,
    /// When it happened.
    pub time: DateTime<Utc>,
    /// Optional free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Avatar control cue carried by [`Event::avatar`] events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvatarCue {
    /// Expression to switch to.
    #[serde(default)]
    pub expression: Option<String>,
    /// Motion to play.
    #[serde(default)]
    pub motion: Option<String>,
    /// Model parameters to set.
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    /// How long the cue lasts, in seconds.
    #[serde(default = "default_avatar_duration")]
    pub duration: f64,
}

fn default_avatar_duration() -> f64 {
    3.0
}

/// The unit of information carried on the bus.
///
/// Identity, timestamp, kind, origin and payload are fixed at construction.
/// Only the processed flag and the append-only history change afterwards, and
/// both are safe to update through a shared reference.
#[derive(Debug)]
pub struct Event {
    id: Uuid,
    timestamp: DateTime<Utc>,
    created: Instant,
    kind: EventKind,
    source: String,
    destination: Option<String>,
    priority: Priority,
    payload: Arc<Payload>,
    processed: AtomicBool,
    history: Mutex<Vec<ProcessingRecord>>,
}

impl Event {
    /// Create a new event with normal priority and no destination.
    #[must_use]
    pub fn new(kind: EventKind, source: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            created: Instant::now(),
            kind,
            source: source.into(),
            destination: None,
            priority: Priority::Normal,
            payload: Arc::new(payload),
            processed: AtomicBool::new(false),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Create an [`EventKind::Input`] event.
    #[must_use]
    pub fn input(source: impl Into<String>, payload: Payload) -> Self {
        Self::new(EventKind::Input, source, payload)
    }

    /// Create an [`EventKind::Internal`] event.
    #[must_use]
    pub fn internal(source: impl Into<String>, payload: Payload) -> Self {
        Self::new(EventKind::Internal, source, payload)
    }

    /// Create an [`EventKind::Output`] event.
    #[must_use]
    pub fn output(source: impl Into<String>, payload: Payload) -> Self {
        Self::new(EventKind::Output, source, payload)
    }

    /// Create an [`EventKind::System`] event.
    #[must_use]
    pub fn system(source: impl Into<String>, payload: Payload) -> Self {
        Self::new(EventKind::System, source, payload)
    }

    /// Create an output event asking display components to show a subtitle.
    #[must_use]
    pub fn subtitle(source: impl Into<String>, text: impl Into<String>, duration: f64) -> Self {
        let mut payload = Payload::new();
        payload.insert("action_type".into(), json!("subtitle"));
        payload.insert("text".into(), Value::String(text.into()));
        payload.insert("duration".into(), json!(duration));
        payload.insert("style".into(), Value::Object(Payload::new()));
        Self::output(source, payload)
    }

    /// Create an output event carrying an avatar cue.
    #[must_use]
    pub fn avatar(source: impl Into<String>, cue: &AvatarCue) -> Self {
        let mut payload = match serde_json::to_value(cue) {
            Ok(Value::Object(map)) => map,
            _ => Payload::new(),
        };
        payload.insert("action_type".into(), json!("avatar"));
        Self::output(source, payload)
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the destination identifier.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Unique identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Logical type.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Origin identifier.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Destination identifier, if any.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The payload. Shared by every receptor and never mutated.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Look up a payload value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Look up a payload string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Whether any handler marked the event as processed.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.processed.load(Ordering::Acquire)
    }

    /// Mark the event as processed by `handler`.
    pub fn mark_processed(&self, handler: impl Into<String>) {
        self.processed.store(true, Ordering::Release);
        self.push_record(handler.into(), None);
    }

    /// Append a note to the processing history.
    pub fn add_note(&self, handler: impl Into<String>, note: impl Into<String>) {
        self.push_record(handler.into(), Some(note.into()));
    }

    /// Snapshot of the processing history.
    #[must_use]
    pub fn history(&self) -> Vec<ProcessingRecord> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Time elapsed since the event was created.
    #[must_use]
    pub fn transit_time(&self) -> Duration {
        self.created.elapsed()
    }

    /// Serialize into a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn to_value(&self) -> EventResult<Value> {
        Ok(serde_json::to_value(self.to_record())?)
    }

    /// Rebuild an event from a value produced by [`Event::to_value`].
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a valid event record.
    pub fn from_value(value: Value) -> EventResult<Self> {
        let record: EventRecord = serde_json::from_value(value)?;
        Ok(Self::from(record))
    }

    /// Snapshot this event as a plain serializable record.
    #[must_use]
    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            id: self.id,
            timestamp: self.timestamp,
            kind: self.kind,
            source: self.source.clone(),
            destination: self.destination.clone(),
            priority: self.priority,
            payload: (*self.payload).clone(),
            processed: self.is_processed(),
            history: self.history(),
        }
    }

    fn push_record(&self, handler: String, note: Option<String>) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ProcessingRecord {
                handler,
                time: Utc::now(),
                note,
            });
    }
}

impl Clone for Event {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            timestamp: self.timestamp,
            created: self.created,
            kind: self.kind,
            source: self.source.clone(),
            destination: self.destination.clone(),
            priority: self.priority,
            payload: Arc::clone(&self.payload),
            processed: AtomicBool::new(self.is_processed()),
            history: Mutex::new(self.history()),
        }
    }
}

/// Serializable form of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier.
    pub id: Uuid,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Logical type.
    pub kind: EventKind,
    /// Origin identifier.
    pub source: String,
    /// Destination identifier.
    #[serde(default)]
    pub destination: Option<String>,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// Payload.
    #[serde(default)]
    pub payload: Payload,
    /// Processed flag.
    #[serde(default)]
    pub processed: bool,
    /// Processing history.
    #[serde(default)]
    pub history: Vec<ProcessingRecord>,
}

impl From<EventRecord> for Event {
    fn from(record: EventRecord) -> Self {
        Self {
            id: record.id,
            timestamp: record.timestamp,
            created: Instant::now(),
            kind: record.kind,
            source: record.source,
            destination: record.destination,
            priority: record.priority,
            payload: Arc::new(record.payload),
            processed: AtomicBool::new(record.processed),
            history: Mutex::new(record.history),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Urgent);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_event_defaults() {
        let event = Event::input("chat", Payload::new());
        assert_eq!(event.kind(), EventKind::Input);
        assert_eq!(event.source(), "chat");
        assert_eq!(event.priority(), Priority::Normal);
        assert!(event.destination().is_none());
        assert!(!event.is_processed());
        assert!(event.history().is_empty());
    }

    #[test]
    fn test_unique_ids() {
        let a = Event::internal("x", Payload::new());
        let b = Event::internal("x", Payload::new());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_mark_processed_and_notes() {
        let event = Event::output("cmd", Payload::new());
        event.add_note("router", "forwarded");
        event.mark_processed("subtitle");

        assert!(event.is_processed());
        let history = event.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].handler, "router");
        assert_eq!(history[0].note.as_deref(), Some("forwarded"));
        assert_eq!(history[1].handler, "subtitle");
        assert!(history[1].note.is_none());
    }

    #[test]
    fn test_subtitle_payload() {
        let event = Event::subtitle("llm", "hello", 5.0);
        assert_eq!(event.kind(), EventKind::Output);
        assert_eq!(event.get_str("action_type"), Some("subtitle"));
        assert_eq!(event.get_str("text"), Some("hello"));
        assert_eq!(event.get("duration"), Some(&json!(5.0)));
    }

    #[test]
    fn test_avatar_payload() {
        let cue = AvatarCue {
            expression: Some("smile".into()),
            ..AvatarCue::default()
        };
        let event = Event::avatar("emotion", &cue);
        assert_eq!(event.get_str("action_type"), Some("avatar"));
        assert_eq!(event.get_str("expression"), Some("smile"));
    }

    #[test]
    fn test_record_restores_identity() {
        let event = Event::system("runtime", Payload::new())
            .with_priority(Priority::Urgent)
            .with_destination("all");
        event.mark_processed("test");

        let value = event.to_value().unwrap();
        assert_eq!(value["kind"], "system");
        assert_eq!(value["priority"], "urgent");

        let restored = Event::from_value(value).unwrap();
        assert_eq!(restored.id(), event.id());
        assert_eq!(restored.timestamp(), event.timestamp());
        assert_eq!(restored.destination(), Some("all"));
        assert!(restored.is_processed());
        assert_eq!(restored.history().len(), 1);
    }

    #[test]
    fn test_from_value_rejects_garbage() {
        assert!(Event::from_value(json!({"kind": "nonsense"})).is_err());
    }

    #[test]
    fn test_clone_shares_payload() {
        let mut payload = Payload::new();
        payload.insert("k".into(), json!(1));
        let event = Event::input("a", payload);
        let copy = event.clone();
        assert_eq!(copy.id(), event.id());
        assert_eq!(copy.payload(), event.payload());
    }
}
