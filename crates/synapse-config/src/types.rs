//! Configuration struct definitions.
//!
//! Every section derives `Default` with the same values as the embedded
//! `defaults.toml`, so a partially written file deserializes cleanly.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Opaque per-component settings, handed to components as a JSON map.
pub type ComponentTable = serde_json::Map<String, serde_json::Value>;

/// The unified Synapse configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log output.
    pub logging: LoggingSection,
    /// Event bus tuning.
    pub bus: BusSection,
    /// Fault layer tuning and per-component recovery policies.
    pub fault: FaultSection,
    /// Plugin discovery and loading.
    pub plugins: PluginsSection,
    /// Settings for individual components, keyed by component name.
    pub components: BTreeMap<String, ComponentTable>,
}

// ---- Logging ----

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct LoggingSection {
    /// Base level filter (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// `stdout`, `stderr` or `file`.
    pub target: String,
    /// Directory for log files when `target = "file"`.
    pub directory: PathBuf,
    /// Log file name prefix.
    pub file_prefix: String,
    /// `daily`, `hourly`, `minutely` or `never`.
    pub rotation: String,
    /// Include timestamps.
    pub timestamps: bool,
    /// Include source file and line.
    pub file_info: bool,
    /// Include thread ids.
    pub thread_ids: bool,
    /// Include thread names.
    pub thread_names: bool,
    /// Log span open/close events.
    pub span_events: bool,
    /// Colored output.
    pub ansi: bool,
    /// Extra filter directives such as `synapse_plugins=debug`.
    pub directives: Vec<String>,
    /// Level overrides for single components, keyed by component name.
    pub components: BTreeMap<String, String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "pretty".to_owned(),
            target: "stderr".to_owned(),
            directory: PathBuf::from("logs"),
            file_prefix: "synapse".to_owned(),
            rotation: "daily".to_owned(),
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

// ---- Bus ----

/// `[bus]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    /// Queue depth at which the bus logs a backlog warning (0 = never).
    pub queue_warn_depth: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            queue_warn_depth: 1000,
        }
    }
}

// ---- Fault ----

/// `[fault]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultSection {
    /// Recent incidents kept in memory.
    pub history_capacity: usize,
    /// Health lost per failure, in (0, 1].
    pub failure_penalty: f64,
    /// Health above which a component's failure counter resets.
    pub recovery_threshold: f64,
    /// Health regained per successful guarded operation.
    pub success_heal: f64,
    /// Health regained when released from quarantine.
    pub release_boost: f64,
    /// Health monitor tick in seconds (0 disables the monitor).
    pub monitor_interval_secs: u64,
    /// Recovery policies keyed by component name.
    pub policies: BTreeMap<String, PolicySection>,
}

impl Default for FaultSection {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            failure_penalty: 0.2,
            recovery_threshold: 0.8,
            success_heal: 0.05,
            release_boost: 0.5,
            monitor_interval_secs: 30,
            policies: BTreeMap::new(),
        }
    }
}

/// Which recovery strategy a policy uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStrategy {
    /// Retry with exponential backoff.
    #[default]
    Retry,
    /// Switch to a fallback after `threshold` failures.
    Degrade,
    /// Quarantine after `threshold` failures.
    Isolate,
}

/// `[fault.policies.<component>]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Strategy.
    pub strategy: PolicyStrategy,
    /// Retries after the first attempt (retry only).
    pub max_attempts: u32,
    /// Delay before the first retry, in seconds (retry only).
    pub delay_secs: f64,
    /// Delay multiplier per retry (retry only).
    pub backoff: f64,
    /// Cap on a single retry delay, in seconds (retry only).
    pub max_delay_secs: f64,
    /// Failures before degrading or isolating.
    pub threshold: u32,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            strategy: PolicyStrategy::Retry,
            max_attempts: 3,
            delay_secs: 1.0,
            backoff: 2.0,
            max_delay_secs: 30.0,
            threshold: 3,
        }
    }
}

// ---- Plugins ----

/// `[plugins]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsSection {
    /// Directories scanned for plugin descriptors. The first one is the
    /// install target.
    pub dirs: Vec<PathBuf>,
    /// If non-empty, only these plugin ids are auto-loaded.
    pub enabled: Vec<String>,
    /// Plugin ids never auto-loaded.
    pub disabled: Vec<String>,
    /// Load enabled plugins at startup.
    pub auto_load: bool,
    /// Activate plugins as soon as they are loaded.
    pub activate_on_load: bool,
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            dirs: vec![PathBuf::from("plugins")],
            enabled: Vec::new(),
            disabled: Vec::new(),
            auto_load: true,
            activate_on_load: false,
        }
    }
}
