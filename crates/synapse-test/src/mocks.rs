//! Mock components and event collectors.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use synapse_component::{
    Component, ComponentContext, ComponentError, ComponentKind, ComponentResult, Receptors,
};
use synapse_events::{Event, EventFilter, Payload, Receptor};

/// Shared, ordered log of lifecycle calls, e.g. `"camera:start"`.
///
/// Clones share the same log, so one journal can observe several components
/// and reveal the order the coordinator drove them in.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    /// All entries so far.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Entries ending in `:{hook}`, with the suffix stripped.
    #[must_use]
    pub fn calls(&self, hook: &str) -> Vec<String> {
        let suffix = format!(":{hook}");
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_suffix(&suffix).map(str::to_owned))
            .collect()
    }

    /// Forget all entries.
    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Shared list of events seen by a receptor.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Arc<Event>>>>);

impl EventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event.
    pub fn push(&self, event: Arc<Event>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<Arc<Event>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The string field `key` of every recorded payload that has one.
    #[must_use]
    pub fn strings(&self, key: &str) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.get_str(key).map(str::to_owned))
            .collect()
    }
}

/// An asynchronous receptor that appends every matching event to a log.
#[must_use]
pub fn collecting_receptor(filter: EventFilter) -> (Receptor, EventLog) {
    let log = EventLog::new();
    let sink = log.clone();
    let receptor = Receptor::asynchronous(move |event| {
        sink.push(event);
        async { Ok(()) }
    })
    .with_filter(filter)
    .with_name("test.collector");
    (receptor, log)
}

/// A component that records its lifecycle calls and, optionally, the events
/// it receives.
#[derive(Debug)]
pub struct RecordingComponent {
    name: String,
    kind: ComponentKind,
    journal: Journal,
    listen: Option<(EventFilter, EventLog)>,
    config: Arc<Mutex<Option<Payload>>>,
    submitted: Arc<Mutex<Vec<Value>>>,
}

impl RecordingComponent {
    /// Create a component with its own journal.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            journal: Journal::new(),
            listen: None,
            config: Arc::new(Mutex::new(None)),
            submitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record into a shared journal.
    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Subscribe on activation and record matching events into `log`.
    #[must_use]
    pub fn listening(mut self, filter: EventFilter, log: EventLog) -> Self {
        self.listen = Some((filter, log));
        self
    }

    /// The journal this component writes to.
    #[must_use]
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Handle to the configuration passed to `initialize`.
    #[must_use]
    pub fn config_probe(&self) -> Arc<Mutex<Option<Payload>>> {
        Arc::clone(&self.config)
    }

    /// Handle to the raw values passed to `submit`.
    #[must_use]
    pub fn submitted_probe(&self) -> Arc<Mutex<Vec<Value>>> {
        Arc::clone(&self.submitted)
    }

    fn note(&self, hook: &str) {
        self.journal.push(format!("{}:{hook}", self.name));
    }
}

#[async_trait]
impl Component for RecordingComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        self.kind
    }

    async fn initialize(&mut self, config: &Payload) -> ComponentResult<()> {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        self.note("initialize");
        Ok(())
    }

    fn register_receptors(&mut self, receptors: &mut Receptors) -> ComponentResult<()> {
        if let Some((filter, log)) = &self.listen {
            let log = log.clone();
            receptors.on_async("record", filter.clone(), move |event| {
                log.push(event);
                async { Ok(()) }
            });
        }
        Ok(())
    }

    async fn start(&mut self, _ctx: &ComponentContext) -> ComponentResult<()> {
        self.note("start");
        Ok(())
    }

    async fn stop(&mut self) -> ComponentResult<()> {
        self.note("stop");
        Ok(())
    }

    async fn submit(&self, raw: Value) -> ComponentResult<()> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(raw);
        self.note("submit");
        Ok(())
    }
}

/// Where a [`FailingComponent`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// `initialize` returns an error.
    Initialize,
    /// `start` returns an error.
    Start,
    /// `stop` returns an error.
    Stop,
    /// Every matching event makes the receptor return an error.
    Receive,
    /// Every matching event makes the receptor panic.
    Panic,
}

/// A component that fails at a chosen point.
#[derive(Debug)]
pub struct FailingComponent {
    name: String,
    kind: ComponentKind,
    point: FailurePoint,
    filter: EventFilter,
    journal: Journal,
}

impl FailingComponent {
    /// Create a component failing at `point`. Receive failures trigger on
    /// every event by default.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ComponentKind, point: FailurePoint) -> Self {
        Self {
            name: name.into(),
            kind,
            point,
            filter: EventFilter::new(),
            journal: Journal::new(),
        }
    }

    /// Only fail on events matching `filter`.
    #[must_use]
    pub fn on(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Record lifecycle calls into a shared journal.
    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    fn fail(&self, hook: &str) -> ComponentResult<()> {
        self.journal.push(format!("{}:{hook}", self.name));
        Err(ComponentError::Failed(format!("{} failed in {hook}", self.name)))
    }
}

#[async_trait]
impl Component for FailingComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        self.kind
    }

    async fn initialize(&mut self, _config: &Payload) -> ComponentResult<()> {
        if self.point == FailurePoint::Initialize {
            return self.fail("initialize");
        }
        Ok(())
    }

    fn register_receptors(&mut self, receptors: &mut Receptors) -> ComponentResult<()> {
        let name = self.name.clone();
        match self.point {
            FailurePoint::Receive => {
                receptors.on("fail", self.filter.clone(), move |_| {
                    Err(ComponentError::Failed(format!("{name} rejected the event")))
                });
            },
            FailurePoint::Panic => {
                receptors.on("panic", self.filter.clone(), move |_| {
                    panic!("{name} panicked on purpose")
                });
            },
            _ => {},
        }
        Ok(())
    }

    async fn start(&mut self, _ctx: &ComponentContext) -> ComponentResult<()> {
        if self.point == FailurePoint::Start {
            return self.fail("start");
        }
        self.journal.push(format!("{}:start", self.name));
        Ok(())
    }

    async fn stop(&mut self) -> ComponentResult<()> {
        if self.point == FailurePoint::Stop {
            return self.fail("stop");
        }
        self.journal.push(format!("{}:stop", self.name));
        Ok(())
    }
}
