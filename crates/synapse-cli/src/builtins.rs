//! Built-in demo plugins.
//!
//! - `console-input` turns stdin lines into input events.
//! - `echo-bridge` forwards input events to an in-process echo remote and
//!   publishes its replies as subtitle output events.
//! - `console-output` prints subtitles.
//!
//! The echo remote is a channel: the bridge sends `{"text": ..}` replies into
//! it and the `run` command feeds them back through the bridge's `submit`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use semver::Version;
use serde_json::{Value, json};
use synapse_component::{
    Component, ComponentError, ComponentResult, ConnectorComponent, InputComponent,
    InputProcessor, Link, OutputAction, OutputAdapter, OutputComponent,
};
use synapse_events::{Event, EventKind, Payload};
use synapse_plugins::{
    FactoryRegistry, PluginCategory, PluginDescriptor, PluginId, VersionConstraint,
};
use tokio::sync::mpsc;
use tracing::debug;

/// Id of the stdin input plugin.
pub(crate) const CONSOLE_INPUT: &str = "console-input";
/// Id of the echo connector plugin.
pub(crate) const ECHO_BRIDGE: &str = "echo-bridge";
/// Id of the stdout output plugin.
pub(crate) const CONSOLE_OUTPUT: &str = "console-output";

/// Register the built-in plugins. Replies of the echo remote go to `replies`.
pub(crate) fn factories(replies: mpsc::UnboundedSender<Value>) -> FactoryRegistry {
    let mut registry = FactoryRegistry::new();

    registry.register_builtin(
        descriptor(CONSOLE_INPUT, PluginCategory::Input, "Reads lines from stdin"),
        |d: &PluginDescriptor| {
            Ok(Box::new(InputComponent::new(d.id.as_str(), ConsoleInput::default()))
                as Box<dyn Component>)
        },
    );

    registry.register_builtin(
        descriptor(CONSOLE_OUTPUT, PluginCategory::Output, "Prints subtitles to stdout"),
        |d: &PluginDescriptor| {
            Ok(Box::new(OutputComponent::new(d.id.as_str(), ConsoleOutput::default()))
                as Box<dyn Component>)
        },
    );

    let minimum = VersionConstraint::AtLeast(Version::new(0, 1, 0));
    registry.register_builtin(
        descriptor(ECHO_BRIDGE, PluginCategory::Generic, "Echoes input back as subtitles")
            .with_dependency(PluginId::from_static(CONSOLE_INPUT), minimum.clone())
            .with_dependency(PluginId::from_static(CONSOLE_OUTPUT), minimum),
        move |d: &PluginDescriptor| {
            let link = EchoLink::new(replies.clone());
            Ok(Box::new(
                ConnectorComponent::new(d.id.as_str(), link).with_kinds([EventKind::Input]),
            ) as Box<dyn Component>)
        },
    );

    registry
}

fn descriptor(id: &str, category: PluginCategory, description: &str) -> PluginDescriptor {
    let mut descriptor = PluginDescriptor::new(
        PluginId::from_static(id),
        Version::new(0, 1, 1),
        category,
        id,
    );
    descriptor.description = description.to_string();
    descriptor.author = "synapse".to_string();
    descriptor
}

fn config_str(config: &Payload, key: &str) -> ComponentResult<Option<String>> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ComponentError::Config(format!("{key} must be a string"))),
    }
}

/// Converts a line of text into an input event.
#[derive(Debug)]
pub(crate) struct ConsoleInput {
    channel: String,
}

impl Default for ConsoleInput {
    fn default() -> Self {
        Self {
            channel: "console".to_string(),
        }
    }
}

#[async_trait]
impl InputProcessor for ConsoleInput {
    async fn configure(&mut self, config: &Payload) -> ComponentResult<()> {
        if let Some(channel) = config_str(config, "channel")? {
            self.channel = channel;
        }
        Ok(())
    }

    async fn process(&self, raw: Value, source: &str) -> ComponentResult<Vec<Event>> {
        let line = match &raw {
            Value::String(line) => line.as_str(),
            Value::Object(map) => map.get("text").and_then(Value::as_str).unwrap_or_default(),
            _ => return Err(ComponentError::Failed(format!("unsupported console input: {raw}"))),
        };
        let text = line.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let mut payload = Payload::new();
        payload.insert("text".into(), Value::String(text.to_string()));
        payload.insert("channel".into(), Value::String(self.channel.clone()));
        Ok(vec![Event::input(source, payload)])
    }
}

/// Prints show actions to stdout.
#[derive(Debug)]
pub(crate) struct ConsoleOutput {
    prefix: String,
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self {
            prefix: "> ".to_string(),
        }
    }
}

impl ConsoleOutput {
    /// The line printed for an action, if any.
    fn render(&self, action: &OutputAction) -> Option<String> {
        match action {
            OutputAction::Show { text, .. } => Some(format!("{}{text}", self.prefix)),
            _ => None,
        }
    }
}

#[async_trait]
impl OutputAdapter for ConsoleOutput {
    async fn configure(&mut self, config: &Payload) -> ComponentResult<()> {
        if let Some(prefix) = config_str(config, "prefix")? {
            self.prefix = prefix;
        }
        Ok(())
    }

    async fn perform(&self, action: &OutputAction) -> ComponentResult<()> {
        match self.render(action) {
            Some(line) => println!("{line}"),
            None => debug!(verb = action.verb(), "Console output ignores action"),
        }
        Ok(())
    }
}

/// An in-process remote that answers every message with the same text.
#[derive(Debug)]
pub(crate) struct EchoLink {
    replies: mpsc::UnboundedSender<Value>,
    connected: AtomicBool,
    template: String,
    duration: f64,
}

impl EchoLink {
    pub(crate) fn new(replies: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            replies,
            connected: AtomicBool::new(false),
            template: "echo: {text}".to_string(),
            duration: 3.0,
        }
    }
}

#[async_trait]
impl Link for EchoLink {
    async fn configure(&mut self, config: &Payload) -> ComponentResult<()> {
        if let Some(template) = config_str(config, "template")? {
            self.template = template;
        }
        if let Some(duration) = config.get("duration").and_then(Value::as_f64) {
            self.duration = duration;
        }
        Ok(())
    }

    async fn connect(&self) -> ComponentResult<()> {
        if self.replies.is_closed() {
            return Err(ComponentError::Failed("echo remote is gone".into()));
        }
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> ComponentResult<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn send(&self, event: &Event) -> ComponentResult<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(ComponentError::Failed("echo remote is not connected".into()));
        }
        let Some(text) = event.get_str("text") else {
            return Ok(());
        };
        self.replies
            .send(json!({ "text": text }))
            .map_err(|_| ComponentError::Failed("echo remote is gone".into()))
    }

    fn translate(&self, raw: Value, source: &str) -> ComponentResult<Vec<Event>> {
        let text = raw
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| ComponentError::Failed(format!("echo reply without text: {raw}")))?;
        Ok(vec![Event::subtitle(
            source,
            self.template.replace("{text}", text),
            self.duration,
        )])
    }
}
