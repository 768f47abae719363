//! Post-merge configuration validation.
//!
//! Checks that deserialized [`Config`] values are within range and that
//! cross-field invariants hold.

use std::collections::BTreeSet;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Config, PolicyStrategy};

/// Validate a fully merged configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_logging(config)?;
    validate_fault(config)?;
    validate_policies(config)?;
    validate_plugins(config)?;
    Ok(())
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

fn is_level(level: &str) -> bool {
    matches!(
        level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    )
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;

    if !is_level(&l.level) {
        return Err(invalid(
            "logging.level",
            format!(
                "unknown level '{}'; expected one of: trace, debug, info, warn, error, off",
                l.level
            ),
        ));
    }

    for (component, level) in &l.components {
        if !is_level(level) {
            return Err(invalid(
                format!("logging.components.{component}"),
                format!("unknown level '{level}'"),
            ));
        }
    }

    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!(
                "unknown format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }

    if !matches!(l.target.as_str(), "stdout" | "stderr" | "file") {
        return Err(invalid(
            "logging.target",
            format!(
                "unknown target '{}'; expected one of: stdout, stderr, file",
                l.target
            ),
        ));
    }

    if !matches!(l.rotation.as_str(), "daily" | "hourly" | "minutely" | "never") {
        return Err(invalid(
            "logging.rotation",
            format!(
                "unknown rotation '{}'; expected one of: daily, hourly, minutely, never",
                l.rotation
            ),
        ));
    }

    if l.target == "file" && l.file_prefix.trim().is_empty() {
        return Err(invalid(
            "logging.file_prefix",
            "file_prefix must not be empty when logging to a file",
        ));
    }

    Ok(())
}

fn unit_interval(field: &str, value: f64, allow_zero: bool) -> ConfigResult<()> {
    let low_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if value.is_finite() && low_ok && value <= 1.0 {
        Ok(())
    } else {
        Err(invalid(
            field,
            format!(
                "{value} is out of range; must be within {}0, 1]",
                if allow_zero { "[" } else { "(" }
            ),
        ))
    }
}

fn validate_fault(config: &Config) -> ConfigResult<()> {
    let f = &config.fault;

    if f.history_capacity == 0 {
        return Err(invalid(
            "fault.history_capacity",
            "history_capacity must be at least 1",
        ));
    }
    unit_interval("fault.failure_penalty", f.failure_penalty, false)?;
    unit_interval("fault.recovery_threshold", f.recovery_threshold, true)?;
    unit_interval("fault.success_heal", f.success_heal, true)?;
    unit_interval("fault.release_boost", f.release_boost, true)?;
    Ok(())
}

fn validate_policies(config: &Config) -> ConfigResult<()> {
    for (component, policy) in &config.fault.policies {
        let field = |name: &str| format!("fault.policies.{component}.{name}");

        match policy.strategy {
            PolicyStrategy::Retry => {
                if !policy.delay_secs.is_finite() || policy.delay_secs < 0.0 {
                    return Err(invalid(
                        field("delay_secs"),
                        "delay_secs must be a finite non-negative number",
                    ));
                }
                if !policy.max_delay_secs.is_finite() || policy.max_delay_secs < 0.0 {
                    return Err(invalid(
                        field("max_delay_secs"),
                        "max_delay_secs must be a finite non-negative number",
                    ));
                }
                if !policy.backoff.is_finite() || policy.backoff < 1.0 {
                    return Err(invalid(field("backoff"), "backoff must be at least 1.0"));
                }
            },
            PolicyStrategy::Degrade | PolicyStrategy::Isolate => {
                if policy.threshold == 0 {
                    return Err(invalid(field("threshold"), "threshold must be at least 1"));
                }
            },
        }
    }
    Ok(())
}

fn validate_plugins(config: &Config) -> ConfigResult<()> {
    let p = &config.plugins;

    let enabled: BTreeSet<&str> = p.enabled.iter().map(String::as_str).collect();
    if let Some(both) = p.disabled.iter().find(|id| enabled.contains(id.as_str())) {
        return Err(invalid(
            "plugins.disabled",
            format!("plugin '{both}' is listed as both enabled and disabled"),
        ));
    }

    if p.dirs.iter().any(|d| d.as_os_str().is_empty()) {
        return Err(invalid("plugins.dirs", "plugin directories must not be empty"));
    }

    Ok(())
}
