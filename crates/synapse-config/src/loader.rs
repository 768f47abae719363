//! Config file discovery and layered loading.
//!
//! `load()` resolves configuration in this order, later layers winning:
//! 1. Embedded `defaults.toml`
//! 2. One config file: the explicit path if given, otherwise
//!    `$SYNAPSE_HOME/config.toml`, otherwise `<user config dir>/config.toml`
//! 3. `SYNAPSE_*` environment fallbacks for fields no file set
//!
//! The merged tree is then deserialized into [`Config`] and validated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{SYNAPSE_HOME, apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::show::ResolvedConfig;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
pub(crate) const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load configuration from defaults, a file and the process environment.
///
/// `explicit` must exist when given. `home_override` replaces the
/// `SYNAPSE_HOME`/platform lookup for the implicit file.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is unreadable or malformed, or the
/// merged configuration fails validation.
pub fn load(explicit: Option<&Path>, home_override: Option<&Path>) -> ConfigResult<ResolvedConfig> {
    load_with_vars(explicit, home_override, &collect_env_vars())
}

/// [`load`] with an explicit set of `SYNAPSE_*` variables instead of the
/// process environment.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_vars(
    explicit: Option<&Path>,
    home_override: Option<&Path>,
    vars: &HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    // 1. Defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut field_sources = FieldSources::new();
    record_leaves(&merged, "", &ConfigLayer::Defaults, &mut field_sources);
    let mut loaded_files = Vec::new();

    // 2. One config file.
    let file = if let Some(path) = explicit {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
        })?;
        Some((overlay, path.to_path_buf()))
    } else {
        match config_home(home_override, vars) {
            Some(home) => {
                let path = home.join("config.toml");
                try_load_file(&path)?.map(|overlay| (overlay, path))
            },
            None => {
                debug!("no configuration directory available, using defaults");
                None
            },
        }
    };

    if let Some((overlay, path)) = file {
        let layer = ConfigLayer::File(path.display().to_string());
        deep_merge_tracking(&mut merged, &overlay, "", &layer, &mut field_sources);
        loaded_files.push(path.clone());
        info!(path = %path.display(), "Loaded config file");
    }

    // 3. Environment fallbacks.
    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, vars);
    if env_count > 0 {
        debug!(count = env_count, "Applied environment variable fallbacks");
    }

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from one file, without defaults layering beyond the
/// struct defaults and without environment fallbacks.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed or fails
/// validation.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let value = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
    })?;
    let config: Config = value.try_into().map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    validate::validate(&config)?;
    Ok(config)
}

/// The directory whose `config.toml` is loaded when no explicit file is
/// given.
#[must_use]
pub fn config_home(
    home_override: Option<&Path>,
    vars: &HashMap<String, String>,
) -> Option<PathBuf> {
    if let Some(home) = home_override {
        return Some(home.to_path_buf());
    }
    if let Some(home) = vars.get(SYNAPSE_HOME).filter(|h| !h.trim().is_empty()) {
        return Some(PathBuf::from(home));
    }
    user_config_dir().ok()
}

/// The platform config directory for Synapse.
///
/// # Errors
///
/// Returns [`ConfigError::NoHomeDir`] if the platform has none.
pub fn user_config_dir() -> ConfigResult<PathBuf> {
    directories::ProjectDirs::from("", "", "synapse")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

/// Read and parse a TOML file, returning `None` if it does not exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}
