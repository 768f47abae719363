//! `SYNAPSE_*` environment fallbacks.
//!
//! Environment variables only fill fields that no config file set; a value
//! written in a file always wins.

use std::collections::HashMap;
use std::ffi::OsStr;

use tracing::warn;

use crate::merge::{ConfigLayer, FieldSources};

/// Directory holding `config.toml`, overriding the platform config dir.
pub const SYNAPSE_HOME: &str = "SYNAPSE_HOME";
/// Fallback for `logging.level`.
pub const SYNAPSE_LOG_LEVEL: &str = "SYNAPSE_LOG_LEVEL";
/// Fallback for `logging.format`.
pub const SYNAPSE_LOG_FORMAT: &str = "SYNAPSE_LOG_FORMAT";
/// Fallback for `plugins.dirs`, in the platform path-list syntax.
pub const SYNAPSE_PLUGIN_DIRS: &str = "SYNAPSE_PLUGIN_DIRS";
/// Fallback for `plugins.auto_load`.
pub const SYNAPSE_AUTO_LOAD: &str = "SYNAPSE_AUTO_LOAD";

/// Snapshot of every `SYNAPSE_*` variable in the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| key.starts_with("SYNAPSE_"))
        .collect()
}

/// Apply fallbacks from `vars` to fields still at their default.
///
/// Returns how many fields were set.
pub fn apply_env_fallbacks(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    vars: &HashMap<String, String>,
) -> usize {
    let mut applied = 0usize;
    let mut apply = |var: &str, field: &str, value: Option<toml::Value>| {
        let Some(value) = value else {
            return;
        };
        if !matches!(sources.get(field), None | Some(ConfigLayer::Defaults)) {
            return;
        }
        if set_dotted(merged, field, value) {
            sources.insert(field.to_owned(), ConfigLayer::Environment(var.to_owned()));
            applied = applied.saturating_add(1);
        }
    };

    apply(
        SYNAPSE_LOG_LEVEL,
        "logging.level",
        non_empty(vars.get(SYNAPSE_LOG_LEVEL)).map(|v| toml::Value::String(v.to_owned())),
    );
    apply(
        SYNAPSE_LOG_FORMAT,
        "logging.format",
        non_empty(vars.get(SYNAPSE_LOG_FORMAT))
            .map(|v| toml::Value::String(v.to_ascii_lowercase())),
    );
    apply(
        SYNAPSE_PLUGIN_DIRS,
        "plugins.dirs",
        non_empty(vars.get(SYNAPSE_PLUGIN_DIRS)).map(|v| {
            toml::Value::Array(
                std::env::split_paths(OsStr::new(v))
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(|p| toml::Value::String(p.display().to_string()))
                    .collect(),
            )
        }),
    );
    apply(
        SYNAPSE_AUTO_LOAD,
        "plugins.auto_load",
        non_empty(vars.get(SYNAPSE_AUTO_LOAD)).and_then(|v| match parse_bool(v) {
            Some(b) => Some(toml::Value::Boolean(b)),
            None => {
                warn!(var = SYNAPSE_AUTO_LOAD, value = v, "Ignoring non-boolean value");
                None
            },
        }),
    );

    applied
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Set a dotted path inside nested tables, creating missing tables.
fn set_dotted(root: &mut toml::Value, path: &str, value: toml::Value) -> bool {
    let mut current = root;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let Some(table) = current.as_table_mut() else {
            return false;
        };
        if parts.peek().is_none() {
            table.insert(part.to_owned(), value);
            return true;
        }
        current = table
            .entry(part)
            .or_insert(toml::Value::Table(toml::map::Map::new()));
    }
    false
}
