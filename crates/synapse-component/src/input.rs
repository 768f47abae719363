//! Input building block: raw external data in, events out.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use synapse_events::{Event, Payload};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, warn};

use crate::component::{Component, ComponentKind, LifecycleState};
use crate::context::ComponentContext;
use crate::error::{ComponentError, ComponentResult};

/// Rewrites raw input before conversion. Failures are counted and the
/// previous value is kept.
pub type Preprocessor =
    Arc<dyn Fn(Value) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Converts raw external data into events.
#[async_trait]
pub trait InputProcessor: Send + Sync + 'static {
    /// Apply component configuration.
    async fn configure(&mut self, _config: &Payload) -> ComponentResult<()> {
        Ok(())
    }

    /// Convert one raw item. `source` is the owning component's name.
    async fn process(&self, raw: Value, source: &str) -> ComponentResult<Vec<Event>>;
}

/// An input component fed through [`Component::submit`].
///
/// Submitted data is queued and converted by a background worker, so
/// `submit` never waits for the conversion.
pub struct InputComponent<P> {
    name: String,
    processor: Arc<P>,
    preprocessors: Vec<(String, Preprocessor)>,
    queue: Option<mpsc::UnboundedSender<Value>>,
    worker: Option<JoinHandle<()>>,
}

impl<P: InputProcessor> InputComponent<P> {
    /// Create an input component.
    pub fn new(name: impl Into<String>, processor: P) -> Self {
        Self {
            name: name.into(),
            processor: Arc::new(processor),
            preprocessors: Vec::new(),
            queue: None,
            worker: None,
        }
    }

    /// Append a preprocessor. Preprocessors run in insertion order.
    #[must_use]
    pub fn with_preprocessor<F>(mut self, label: impl Into<String>, preprocessor: F) -> Self
    where
        F: Fn(Value) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.preprocessors
            .push((label.into(), Arc::new(preprocessor)));
        self
    }

    /// The wrapped processor.
    #[must_use]
    pub fn processor(&self) -> &P {
        &self.processor
    }
}

#[async_trait]
impl<P: InputProcessor> Component for InputComponent<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Input
    }

    async fn initialize(&mut self, config: &Payload) -> ComponentResult<()> {
        let name = self.name.clone();
        let processor = Arc::get_mut(&mut self.processor).ok_or(ComponentError::InvalidState {
            component: name,
            state: LifecycleState::Active,
            operation: "initialize",
        })?;
        processor.configure(config).await
    }

    async fn start(&mut self, ctx: &ComponentContext) -> ComponentResult<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            ctx: ctx.clone(),
            processor: Arc::clone(&self.processor),
            preprocessors: self.preprocessors.clone(),
        };
        self.queue = Some(tx);
        let span = ctx.span().clone();
        self.worker = Some(tokio::spawn(worker.run(rx).instrument(span)));
        debug!(component = %self.name, "Input worker started");
        Ok(())
    }

    async fn stop(&mut self) -> ComponentResult<()> {
        self.queue = None;
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.await
            && e.is_panic()
        {
            error!(component = %self.name, "Input worker panicked");
        }
        Ok(())
    }

    async fn submit(&self, raw: Value) -> ComponentResult<()> {
        let Some(queue) = &self.queue else {
            return Err(ComponentError::InvalidState {
                component: self.name.clone(),
                state: LifecycleState::Inactive,
                operation: "submit",
            });
        };
        queue
            .send(raw)
            .map_err(|_| ComponentError::Failed(format!("input queue of '{}' is closed", self.name)))
    }
}

struct Worker<P> {
    ctx: ComponentContext,
    processor: Arc<P>,
    preprocessors: Vec<(String, Preprocessor)>,
}

impl<P: InputProcessor> Worker<P> {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Value>) {
        let cancel = self.ctx.cancellation();
        let emitter = self.ctx.emitter();
        loop {
            let raw = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(raw) => raw,
                    None => break,
                },
            };

            let stats = self.ctx.stats();
            stats.bump("inputs_processed");
            stats.touch();

            let raw = self.preprocess(raw);
            match self.processor.process(raw, emitter.source()).await {
                Ok(events) => {
                    for event in events {
                        emitter.publish(event);
                    }
                },
                Err(e) => {
                    let incident = self.ctx.report(e);
                    warn!(component = %self.ctx.name(), "Input conversion failed: {incident}");
                },
            }
        }
        debug!(component = %self.ctx.name(), "Input worker exited");
    }

    fn preprocess(&self, raw: Value) -> Value {
        let mut value = raw;
        for (label, preprocessor) in &self.preprocessors {
            match preprocessor(value.clone()) {
                Ok(next) => value = next,
                Err(e) => {
                    self.ctx.stats().record_error();
                    error!(
                        component = %self.ctx.name(),
                        preprocessor = %label,
                        error = %e,
                        "Input preprocessing failed"
                    );
                },
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ComponentHandle;
    use serde_json::json;
    use std::time::Duration;
    use synapse_events::{EventBus, EventFilter, EventKind, Receptor};
    use synapse_fault::{FaultLayer, IncidentKind};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Lines {
        prefix: String,
    }

    #[async_trait]
    impl InputProcessor for Lines {
        async fn configure(&mut self, config: &Payload) -> ComponentResult<()> {
            if let Some(prefix) = config.get("prefix").and_then(Value::as_str) {
                self.prefix = prefix.to_string();
            }
            Ok(())
        }

        async fn process(&self, raw: Value, source: &str) -> ComponentResult<Vec<Event>> {
            let text = raw
                .as_str()
                .ok_or_else(|| ComponentError::InvalidPayload("expected a string".into()))?;
            let mut payload = Payload::new();
            payload.insert("text".into(), json!(format!("{}{text}", self.prefix)));
            Ok(vec![Event::input(source, payload)])
        }
    }

    fn collect(bus: &EventBus) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(
            Receptor::sync(move |event| {
                let _ = tx.send(event.get_str("text").unwrap_or_default().to_string());
                Ok(())
            })
            .with_filter(EventFilter::new().kinds([EventKind::Input])),
        );
        rx
    }

    async fn setup(component: InputComponent<Lines>) -> (ComponentHandle, EventBus, Arc<FaultLayer>) {
        let bus = EventBus::new();
        bus.start();
        let fault = Arc::new(FaultLayer::default());
        let handle = ComponentHandle::new(Box::new(component), bus.clone(), Arc::clone(&fault));
        let mut config = Payload::new();
        config.insert("prefix".into(), json!("> "));
        handle.initialize(&config).await.unwrap();
        handle.activate().await.unwrap();
        (handle, bus, fault)
    }

    #[tokio::test]
    async fn test_submit_publishes_converted_events_in_order() {
        let component = InputComponent::new(
            "console",
            Lines {
                prefix: String::new(),
            },
        );
        let (handle, bus, _fault) = setup(component).await;
        let mut rx = collect(&bus);

        for line in ["one", "two", "three"] {
            handle.submit(json!(line)).await.unwrap();
        }
        for expected in ["> one", "> two", "> three"] {
            let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, expected);
        }
        assert_eq!(handle.stats().counter("inputs_processed"), 3);
        assert_eq!(handle.stats().transmitted(), 3);

        handle.deactivate().await.unwrap();
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_preprocessors_run_in_order_and_survive_failures() {
        let component = InputComponent::new(
            "console",
            Lines {
                prefix: String::new(),
            },
        )
        .with_preprocessor("trim", |v| {
            Ok(json!(v.as_str().unwrap_or_default().trim()))
        })
        .with_preprocessor("broken", |_| Err("nope".into()))
        .with_preprocessor("upper", |v| {
            Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
        });
        let (handle, bus, _fault) = setup(component).await;
        let mut rx = collect(&bus);

        handle.submit(json!("  hi  ")).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, "> HI");
        assert_eq!(handle.stats().errors(), 1);

        handle.deactivate().await.unwrap();
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_conversion_failure_reported_as_input_incident() {
        let component = InputComponent::new(
            "console",
            Lines {
                prefix: String::new(),
            },
        );
        let (handle, bus, fault) = setup(component).await;
        let mut rx = collect(&bus);

        handle.submit(json!(42)).await.unwrap();
        handle.submit(json!("ok")).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, "> ok");

        let incidents = fault.recent_incidents();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].kind(), IncidentKind::InputSource);
        assert_eq!(incidents[0].component(), Some("console"));

        handle.deactivate().await.unwrap();
        assert!(handle.submit(json!("late")).await.is_err());
        bus.stop().await;
    }
}
