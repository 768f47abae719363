//! Output building block: events in, external actions out.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use synapse_events::{Event, EventFilter, EventKind, Payload};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, trace};
use uuid::Uuid;

use crate::action::OutputAction;
use crate::component::{Component, ComponentKind, LifecycleState};
use crate::context::ComponentContext;
use crate::error::{ComponentError, ComponentResult};
use crate::receptors::Receptors;

/// Performs output actions against an external target.
#[async_trait]
pub trait OutputAdapter: Send + Sync + 'static {
    /// Apply component configuration.
    async fn configure(&mut self, _config: &Payload) -> ComponentResult<()> {
        Ok(())
    }

    /// Actions requested by an event. Defaults to [`OutputAction::from_event`].
    fn convert(&self, event: &Event) -> ComponentResult<Vec<OutputAction>> {
        OutputAction::from_event(event)
    }

    /// Perform one action. Retried according to the component's policy.
    async fn perform(&self, action: &OutputAction) -> ComponentResult<()>;
}

struct Job {
    action: OutputAction,
    origin: Uuid,
    needs_feedback: bool,
}

/// An output component: subscribes to accepted kinds, converts events into
/// [`OutputAction`]s and performs them in order on a background worker.
///
/// Events with `needs_feedback: true` produce an internal feedback event per
/// performed action.
pub struct OutputComponent<A> {
    name: String,
    adapter: Arc<A>,
    accepted: Vec<EventKind>,
    pending: Option<mpsc::UnboundedReceiver<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl<A: OutputAdapter> OutputComponent<A> {
    /// Create an output component accepting output events.
    pub fn new(name: impl Into<String>, adapter: A) -> Self {
        Self {
            name: name.into(),
            adapter: Arc::new(adapter),
            accepted: vec![EventKind::Output],
            pending: None,
            worker: None,
        }
    }

    /// Replace the accepted event kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.accepted = kinds.into_iter().collect();
        self
    }

    /// The wrapped adapter.
    #[must_use]
    pub fn adapter(&self) -> &A {
        &self.adapter
    }
}

#[async_trait]
impl<A: OutputAdapter> Component for OutputComponent<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Output
    }

    async fn initialize(&mut self, config: &Payload) -> ComponentResult<()> {
        let name = self.name.clone();
        let adapter = Arc::get_mut(&mut self.adapter).ok_or(ComponentError::InvalidState {
            component: name,
            state: LifecycleState::Active,
            operation: "initialize",
        })?;
        adapter.configure(config).await
    }

    fn register_receptors(&mut self, receptors: &mut Receptors) -> ComponentResult<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending = Some(rx);

        let adapter = Arc::clone(&self.adapter);
        let stats = Arc::clone(receptors.context().stats());
        receptors.on_async(
            "actions",
            EventFilter::new().kinds(self.accepted.iter().copied()),
            move |event| {
                let tx = tx.clone();
                let adapter = Arc::clone(&adapter);
                let stats = Arc::clone(&stats);
                async move {
                    let actions = adapter.convert(&event)?;
                    if actions.is_empty() {
                        trace!(event_id = %event.id(), "Event requests no output action");
                    }
                    let needs_feedback = event
                        .get("needs_feedback")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false);
                    for action in actions {
                        tx.send(Job {
                            action,
                            origin: event.id(),
                            needs_feedback,
                        })
                        .map_err(|_| ComponentError::Failed("output worker stopped".into()))?;
                        stats.bump("actions_queued");
                    }
                    Ok(())
                }
            },
        );
        Ok(())
    }

    async fn start(&mut self, ctx: &ComponentContext) -> ComponentResult<()> {
        let rx = self.pending.take().ok_or_else(|| {
            ComponentError::Failed(format!("receptors of '{}' were not registered", self.name))
        })?;
        self.worker = Some(tokio::spawn(
            run_worker(ctx.clone(), Arc::clone(&self.adapter), rx).instrument(ctx.span().clone()),
        ));
        Ok(())
    }

    async fn stop(&mut self) -> ComponentResult<()> {
        self.pending = None;
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.await
            && e.is_panic()
        {
            error!(component = %self.name, "Output worker panicked");
        }
        Ok(())
    }
}

async fn run_worker<A: OutputAdapter>(
    ctx: ComponentContext,
    adapter: Arc<A>,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    let cancel = ctx.cancellation();
    let emitter = ctx.emitter();
    loop {
        let job = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(job) => job,
                None => break,
            },
        };

        let performed = ctx.guard(|| adapter.perform(&job.action)).await;
        let status = match &performed {
            Ok(()) => {
                ctx.stats().bump("actions_performed");
                ctx.stats().touch();
                "done"
            },
            Err(_) => "failed",
        };
        debug!(
            component = %ctx.name(),
            verb = job.action.verb(),
            status,
            "Output action finished"
        );

        if job.needs_feedback {
            let mut payload = Payload::new();
            payload.insert("feedback_for".into(), json!(job.origin));
            payload.insert("status".into(), json!(status));
            payload.insert(
                "action".into(),
                serde_json::to_value(&job.action).unwrap_or_default(),
            );
            emitter.internal(payload);
        }
    }
    debug!(component = %ctx.name(), "Output worker exited");
}
