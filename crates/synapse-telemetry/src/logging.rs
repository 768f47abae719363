//! Log subscriber construction.
//!
//! [`LogConfig::subscriber`] assembles the filter, the writer and the
//! formatting layer without touching global state, so tests can scope it
//! with `tracing::subscriber::with_default`. [`setup_logging`] installs the
//! same subscriber process-wide.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{TelemetryError, TelemetryResult};
use crate::span::component_directive;

/// How often a log file is rolled over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    /// One file per day.
    #[default]
    Daily,
    /// One file per hour.
    Hourly,
    /// One file per minute.
    Minutely,
    /// A single file.
    Never,
}

impl From<FileRotation> for Rotation {
    fn from(rotation: FileRotation) -> Self {
        match rotation {
            FileRotation::Daily => Self::DAILY,
            FileRotation::Hourly => Self::HOURLY,
            FileRotation::Minutely => Self::MINUTELY,
            FileRotation::Never => Self::NEVER,
        }
    }
}

/// Line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line and colored, for a terminal.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event, with the current component span's fields.
    Json,
    /// The stock `tracing-subscriber` layout.
    Full,
}

/// Where log lines go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Standard output.
    Stdout,
    /// Standard error, which keeps stdout free for `synapse run` output.
    #[default]
    Stderr,
    /// Rolling files in this directory.
    File(PathBuf),
}

/// Rolling file settings for [`LogTarget::File`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLogConfig {
    /// File name prefix. With daily rotation `synapse` yields
    /// `synapse.2026-01-15`; without rotation the file is just `synapse`.
    #[serde(default = "default_file_prefix")]
    pub prefix: String,
    /// Rollover schedule.
    #[serde(default)]
    pub rotation: FileRotation,
}

fn default_file_prefix() -> String {
    "synapse".to_string()
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            prefix: default_file_prefix(),
            rotation: FileRotation::default(),
        }
    }
}

/// Everything needed to build the runtime's log subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct LogConfig {
    /// Base level for everything without a more specific rule.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Output target.
    pub target: LogTarget,
    /// Used when `target` is a directory.
    pub file: FileLogConfig,
    /// Prefix lines with a timestamp.
    pub timestamps: bool,
    /// Source file and line of each event.
    pub file_info: bool,
    /// Include thread ids.
    pub thread_ids: bool,
    /// Include thread names.
    pub thread_names: bool,
    /// Emit a line when a span opens and closes. With component spans this
    /// traces every worker and receptor run.
    pub span_events: bool,
    /// Colored output.
    pub ansi: bool,
    /// Raw `EnvFilter` directives, e.g. `synapse_plugins=debug`.
    pub directives: Vec<String>,
    /// Level overrides for single components, keyed by component name.
    pub components: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            file: FileLogConfig::default(),
            timestamps: true,
            file_info: false,
            thread_ids: false,
            thread_names: false,
            span_events: false,
            ansi: true,
            directives: Vec::new(),
            components: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    /// Defaults with the given base level.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Set the line format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the output target.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Write rolling files to `directory`. Colors are turned off since the
    /// escape codes would end up in the files.
    #[must_use]
    pub fn with_file_logging(
        mut self,
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
        rotation: FileRotation,
    ) -> Self {
        self.target = LogTarget::File(directory.into());
        self.file = FileLogConfig {
            prefix: prefix.into(),
            rotation,
        };
        self.ansi = false;
        self
    }

    /// Add a raw filter directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Log `component` at `level` regardless of the base level.
    #[must_use]
    pub fn with_component_level(
        mut self,
        component: impl Into<String>,
        level: impl Into<String>,
    ) -> Self {
        self.components.insert(component.into(), level.into());
        self
    }

    /// Drop timestamps, e.g. when journald adds its own.
    #[must_use]
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Include source file and line.
    #[must_use]
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Disable colors.
    #[must_use]
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    /// Build the subscriber without installing it.
    ///
    /// # Errors
    ///
    /// Returns an error if a level, directive or component name is invalid,
    /// or the log directory cannot be prepared.
    pub fn subscriber(&self) -> TelemetryResult<impl Subscriber + Send + Sync + 'static> {
        let filter = self.filter()?;
        let writer = self.writer()?;
        Ok(tracing_subscriber::registry()
            .with(filter)
            .with(self.fmt_layer(writer)))
    }

    fn filter(&self) -> TelemetryResult<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level).map_err(|e| {
            TelemetryError::ConfigError(format!("invalid level '{}': {e}", self.level))
        })?;

        let per_component = self
            .components
            .iter()
            .map(|(component, level)| component_directive(component, level));
        for directive in self.directives.iter().cloned().map(Ok).chain(per_component) {
            let directive = directive?;
            filter = filter.add_directive(directive.parse().map_err(|e: ParseError| {
                TelemetryError::ConfigError(format!("invalid directive '{directive}': {e}"))
            })?);
        }
        Ok(filter)
    }

    fn writer(&self) -> TelemetryResult<BoxMakeWriter> {
        Ok(match &self.target {
            LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogTarget::File(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = RollingFileAppender::builder()
                    .rotation(self.file.rotation.into())
                    .filename_prefix(self.file.prefix.clone())
                    .build(dir)
                    .map_err(|e| TelemetryError::InitError(e.to_string()))?;
                BoxMakeWriter::new(appender)
            },
        })
    }

    fn fmt_layer<S>(&self, writer: BoxMakeWriter) -> Box<dyn Layer<S> + Send + Sync + 'static>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let span_events = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(self.ansi)
            .with_file(self.file_info)
            .with_line_number(self.file_info)
            .with_thread_ids(self.thread_ids)
            .with_thread_names(self.thread_names)
            .with_span_events(span_events);

        match (self.format, self.timestamps) {
            (LogFormat::Json, true) => layer.json().boxed(),
            (LogFormat::Json, false) => layer.json().without_time().boxed(),
            (LogFormat::Pretty, true) => layer.pretty().boxed(),
            (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
            (LogFormat::Compact, true) => layer.compact().boxed(),
            (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
            (LogFormat::Full, true) => layer.boxed(),
            (LogFormat::Full, false) => layer.without_time().boxed(),
        }
    }
}

/// Install the subscriber described by `config` as the global default.
///
/// # Errors
///
/// Returns an error if the config is invalid or a global subscriber is
/// already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    config
        .subscriber()?
        .try_init()
        .map_err(|e| TelemetryError::InitError(e.to_string()))
}

/// Install the default subscriber: `info`, pretty, on stderr.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}

#[cfg(feature = "config")]
impl From<&synapse_config::LoggingSection> for LogConfig {
    fn from(section: &synapse_config::LoggingSection) -> Self {
        let format = match section.format.as_str() {
            "compact" => LogFormat::Compact,
            "json" => LogFormat::Json,
            "full" => LogFormat::Full,
            _ => LogFormat::Pretty,
        };
        let rotation = match section.rotation.as_str() {
            "hourly" => FileRotation::Hourly,
            "minutely" => FileRotation::Minutely,
            "never" => FileRotation::Never,
            _ => FileRotation::Daily,
        };
        let target = match section.target.as_str() {
            "stdout" => LogTarget::Stdout,
            "file" => LogTarget::File(section.directory.clone()),
            _ => LogTarget::Stderr,
        };
        let to_file = matches!(target, LogTarget::File(_));
        Self {
            level: section.level.clone(),
            format,
            target,
            file: FileLogConfig {
                prefix: section.file_prefix.clone(),
                rotation,
            },
            timestamps: section.timestamps,
            file_info: section.file_info,
            thread_ids: section.thread_ids,
            thread_names: section.thread_names,
            span_events: section.span_events,
            ansi: section.ansi && !to_file,
            directives: section.directives.clone(),
            components: section.components.clone(),
        }
    }
}
