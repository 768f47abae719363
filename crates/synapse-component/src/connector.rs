//! Connector building block: a bidirectional bridge to an external system.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use synapse_events::{Event, EventFilter, EventKind, Payload};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::component::{Component, ComponentKind, LifecycleState};
use crate::context::ComponentContext;
use crate::error::{ComponentError, ComponentResult};
use crate::receptors::Receptors;

const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Connection state of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected.
    Connected,
    /// Reconnection gave up.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        })
    }
}

/// Transport to an external system.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Apply component configuration.
    async fn configure(&mut self, _config: &Payload) -> ComponentResult<()> {
        Ok(())
    }

    /// Open the connection.
    async fn connect(&self) -> ComponentResult<()>;

    /// Close the connection.
    async fn disconnect(&self) -> ComponentResult<()>;

    /// Deliver a subscribed event to the external system.
    async fn send(&self, event: &Event) -> ComponentResult<()>;

    /// Convert an external message into events. `source` is the owning
    /// component's name.
    fn translate(&self, raw: Value, source: &str) -> ComponentResult<Vec<Event>>;
}

/// A connector component.
///
/// Connects on activation; when the connection is missing or lost, a
/// background loop retries every `reconnect_interval` up to
/// `max_reconnect_attempts` times (both overridable through the component
/// configuration). Subscribed events (internal by default) are forwarded to
/// [`Link::send`] while connected; external messages handed to
/// [`Component::submit`] are translated and published.
pub struct ConnectorComponent<L> {
    name: String,
    link: Arc<L>,
    accepted: Vec<EventKind>,
    reconnect_interval: Duration,
    max_reconnect_attempts: u32,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Option<Arc<Session<L>>>,
}

impl<L: Link> ConnectorComponent<L> {
    /// Create a connector accepting internal events.
    pub fn new(name: impl Into<String>, link: L) -> Self {
        Self {
            name: name.into(),
            link: Arc::new(link),
            accepted: vec![EventKind::Internal],
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            state: Arc::new(watch::Sender::new(ConnectionState::Disconnected)),
            session: None,
        }
    }

    /// Replace the accepted event kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.accepted = kinds.into_iter().collect();
        self
    }

    /// Override the reconnect schedule.
    #[must_use]
    pub fn with_reconnect(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.reconnect_interval = interval;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver observing connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The wrapped link.
    #[must_use]
    pub fn link(&self) -> &L {
        &self.link
    }

    fn apply_config(&mut self, config: &Payload) -> ComponentResult<()> {
        match config.get("reconnect_interval") {
            None | Some(Value::Null) => {},
            Some(value) => {
                self.reconnect_interval = value
                    .as_f64()
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .ok_or_else(|| {
                        ComponentError::Config(format!(
                            "{}: reconnect_interval out of range: {value}",
                            self.name
                        ))
                    })?;
            },
        }
        match config.get("max_reconnect_attempts") {
            None | Some(Value::Null) => {},
            Some(value) => {
                self.max_reconnect_attempts = value
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| {
                        ComponentError::Config(format!(
                            "{}: max_reconnect_attempts must be a non-negative integer",
                            self.name
                        ))
                    })?;
            },
        }
        Ok(())
    }
}

#[async_trait]
impl<L: Link> Component for ConnectorComponent<L> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Connector
    }

    async fn initialize(&mut self, config: &Payload) -> ComponentResult<()> {
        self.apply_config(config)?;
        let name = self.name.clone();
        let link = Arc::get_mut(&mut self.link).ok_or(ComponentError::InvalidState {
            component: name,
            state: LifecycleState::Active,
            operation: "initialize",
        })?;
        link.configure(config).await?;
        info!(
            component = %self.name,
            reconnect_interval_ms = u64::try_from(self.reconnect_interval.as_millis()).unwrap_or(u64::MAX),
            max_reconnect_attempts = self.max_reconnect_attempts,
            "Connector initialized"
        );
        Ok(())
    }

    fn register_receptors(&mut self, receptors: &mut Receptors) -> ComponentResult<()> {
        let session = Arc::new(Session {
            ctx: receptors.context().clone(),
            link: Arc::clone(&self.link),
            state: Arc::clone(&self.state),
            interval: self.reconnect_interval,
            max_attempts: self.max_reconnect_attempts,
            reconnect: Mutex::new(None),
        });
        self.session = Some(Arc::clone(&session));

        let own_name = self.name.clone();
        let filter = EventFilter::new()
            .kinds(self.accepted.iter().copied())
            .predicate(move |event| event.source() != own_name);
        receptors.on_async("forward", filter, move |event| {
            let session = Arc::clone(&session);
            async move { session.forward(&event).await }
        });
        Ok(())
    }

    async fn start(&mut self, _ctx: &ComponentContext) -> ComponentResult<()> {
        let session = self.session.clone().ok_or_else(|| {
            ComponentError::Failed(format!("receptors of '{}' were not registered", self.name))
        })?;
        if !session.connect_once().await {
            session.ensure_reconnecting();
        }
        info!(component = %self.name, state = %self.connection_state(), "Connector started");
        Ok(())
    }

    async fn stop(&mut self) -> ComponentResult<()> {
        if let Some(session) = self.session.take() {
            session.stop_reconnecting().await;
        }
        let result = self.link.disconnect().await;
        self.state.send_replace(ConnectionState::Disconnected);
        result
    }

    async fn submit(&self, raw: Value) -> ComponentResult<()> {
        let Some(session) = &self.session else {
            return Err(ComponentError::InvalidState {
                component: self.name.clone(),
                state: LifecycleState::Inactive,
                operation: "submit",
            });
        };
        let emitter = session.ctx.emitter();
        let events = self
            .link
            .translate(raw, emitter.source())
            .map_err(|e| ComponentError::Incident(session.ctx.report(e)))?;
        session.ctx.stats().bump("messages_received");
        session.ctx.stats().touch();
        for event in events {
            emitter.publish(event);
        }
        Ok(())
    }
}

struct Session<L> {
    ctx: ComponentContext,
    link: Arc<L>,
    state: Arc<watch::Sender<ConnectionState>>,
    interval: Duration,
    max_attempts: u32,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

impl<L: Link> Session<L> {
    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous == next {
            return;
        }
        if next == ConnectionState::Connected {
            info!(component = %self.ctx.name(), "Connection state {previous} -> {next}");
        } else if previous == ConnectionState::Connected {
            self.ctx.stats().bump("connection_failures");
            warn!(component = %self.ctx.name(), "Connection state {previous} -> {next}");
        } else {
            debug!(component = %self.ctx.name(), "Connection state {previous} -> {next}");
        }
    }

    async fn connect_once(&self) -> bool {
        self.set_state(ConnectionState::Connecting);
        match self.link.connect().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                true
            },
            Err(e) => {
                let incident = self.ctx.report(e);
                warn!(component = %self.ctx.name(), "Connection attempt failed: {incident}");
                self.set_state(ConnectionState::Disconnected);
                false
            },
        }
    }

    async fn forward(self: &Arc<Self>, event: &Event) -> ComponentResult<()> {
        if self.current() != ConnectionState::Connected {
            debug!(
                component = %self.ctx.name(),
                event_id = %event.id(),
                "Not connected, dropping outbound event"
            );
            self.ctx.stats().bump("messages_dropped");
            return Ok(());
        }
        match self.link.send(event).await {
            Ok(()) => {
                self.ctx.stats().bump("messages_sent");
                Ok(())
            },
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                self.ensure_reconnecting();
                Err(e)
            },
        }
    }

    /// Spawn the reconnect loop unless one is running or reconnecting is off.
    fn ensure_reconnecting(self: &Arc<Self>) {
        if self.max_attempts == 0 || self.ctx.cancellation().is_cancelled() {
            return;
        }
        let mut slot = self.reconnect.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let session = Arc::clone(self);
        let span = self.ctx.span().clone();
        *slot = Some(tokio::spawn(
            async move { session.reconnect_loop().await }.instrument(span),
        ));
    }

    async fn reconnect_loop(&self) {
        let cancel = self.ctx.cancellation();
        let mut attempts: u32 = 0;
        while self.current() != ConnectionState::Connected {
            if attempts >= self.max_attempts {
                error!(
                    component = %self.ctx.name(),
                    attempts,
                    "Giving up reconnecting"
                );
                self.set_state(ConnectionState::Failed);
                return;
            }
            attempts = attempts.saturating_add(1);
            self.ctx.stats().bump("reconnect_attempts");
            info!(
                component = %self.ctx.name(),
                attempt = attempts,
                max_attempts = self.max_attempts,
                "Reconnecting"
            );

            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                connected = self.connect_once() => connected,
            };
            if connected {
                info!(component = %self.ctx.name(), "Reconnected");
                return;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.interval) => {},
            }
        }
    }

    async fn stop_reconnecting(&self) {
        let task = self
            .reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
            && e.is_panic()
        {
            error!(component = %self.ctx.name(), "Reconnect loop panicked");
        }
    }
}

impl<L> fmt::Debug for ConnectorComponent<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorComponent")
            .field("name", &self.name)
            .field("state", &*self.state.borrow())
            .field("reconnect_interval", &self.reconnect_interval)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish_non_exhaustive()
    }
}
