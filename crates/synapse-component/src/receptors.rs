//! Receptor registration on behalf of a component.
//!
//! Every callback registered here is wrapped so that it:
//!
//! - is skipped while the owning component is quarantined
//! - counts a successful run as a processed event
//! - turns an error or a panic into an incident reported to the fault layer,
//!   classified by the component's category

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use synapse_events::{Event, EventFilter, Receptor, ReceptorResult, SubscriptionId};
use tracing::{Instrument, trace};

use crate::context::{ComponentContext, Emitter};
use crate::error::ComponentError;

/// Collects the receptors a component subscribes on activation.
#[derive(Debug)]
pub struct Receptors {
    ctx: ComponentContext,
    pending: Vec<Receptor>,
}

impl Receptors {
    pub(crate) fn new(ctx: ComponentContext) -> Self {
        Self {
            ctx,
            pending: Vec::new(),
        }
    }

    /// Context of the activation in progress.
    #[must_use]
    pub fn context(&self) -> &ComponentContext {
        &self.ctx
    }

    /// Publisher for use inside callbacks.
    #[must_use]
    pub fn emitter(&self) -> Emitter {
        self.ctx.emitter()
    }

    /// Register a synchronous callback. `label` names the receptor in logs.
    pub fn on<F>(&mut self, label: &str, filter: EventFilter, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<(), ComponentError> + Send + Sync + 'static,
    {
        let tracker = Tracker::new(self.ctx.clone(), label);
        let receptor = Receptor::sync(move |event| {
            let _entered = tracker.ctx.span().enter();
            if tracker.skip(event) {
                return Ok(());
            }
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
            tracker.settle(outcome)
        });
        self.push(label, filter, receptor)
    }

    /// Register an asynchronous callback. `label` names the receptor in logs.
    pub fn on_async<F, Fut>(&mut self, label: &str, filter: EventFilter, callback: F) -> SubscriptionId
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ComponentError>> + Send + 'static,
    {
        let tracker = Arc::new(Tracker::new(self.ctx.clone(), label));
        let callback = Arc::new(callback);
        let receptor = Receptor::asynchronous(move |event| {
            let tracker = Arc::clone(&tracker);
            let callback = Arc::clone(&callback);
            let span = tracker.ctx.span().clone();
            async move {
                if tracker.skip(&event) {
                    return Ok(());
                }
                let outcome = AssertUnwindSafe(callback(event)).catch_unwind().await;
                tracker.settle(outcome)
            }
            .instrument(span)
        });
        self.push(label, filter, receptor)
    }

    /// Number of receptors collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no receptor was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn into_pending(self) -> Vec<Receptor> {
        self.pending
    }

    fn push(&mut self, label: &str, filter: EventFilter, receptor: Receptor) -> SubscriptionId {
        let receptor = receptor
            .with_filter(filter)
            .with_name(format!("{}.{label}", self.ctx.name()))
            .with_owner(self.ctx.name());
        let id = receptor.id();
        self.pending.push(receptor);
        id
    }
}

struct Tracker {
    ctx: ComponentContext,
    label: String,
}

impl Tracker {
    fn new(ctx: ComponentContext, label: &str) -> Self {
        Self {
            ctx,
            label: label.to_string(),
        }
    }

    fn skip(&self, event: &Event) -> bool {
        if self.ctx.is_quarantined() {
            trace!(
                component = %self.ctx.name(),
                receptor = %self.label,
                event_id = %event.id(),
                "Skipping event for quarantined component"
            );
            return true;
        }
        false
    }

    fn settle(
        &self,
        outcome: Result<Result<(), ComponentError>, Box<dyn Any + Send>>,
    ) -> ReceptorResult {
        let error = match outcome {
            Ok(Ok(())) => {
                self.ctx.stats().record_processed();
                return Ok(());
            },
            Ok(Err(error)) => error,
            Err(panic) => ComponentError::Failed(format!(
                "receptor '{}' panicked: {}",
                self.label,
                panic_message(panic.as_ref())
            )),
        };
        let incident = self.ctx.report(error);
        Err(incident.into())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
