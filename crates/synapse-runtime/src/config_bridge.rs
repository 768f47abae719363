//! Bridge from `synapse_config::Config` to domain types.
//!
//! The config crate has no dependencies on other Synapse crates. This module
//! translates its sections into the settings used by the fault layer, the
//! plugin manager, the runtime and the logging setup. The CLI converts
//! through here so the mapping lives in one place.

use std::collections::BTreeMap;
use std::time::Duration;

use synapse_config::{Config, PolicySection, PolicyStrategy};
use synapse_events::Payload;
use synapse_fault::{FaultSettings, RecoveryPolicy, RetrySettings};
use synapse_plugins::PluginSettings;
use synapse_telemetry::LogConfig;
use tracing::warn;

use crate::runtime::RuntimeSettings;

/// Convert config to [`RuntimeSettings`].
#[must_use]
pub fn to_runtime_settings(cfg: &Config) -> RuntimeSettings {
    let monitor_interval = (cfg.fault.monitor_interval_secs > 0)
        .then(|| Duration::from_secs(cfg.fault.monitor_interval_secs));
    RuntimeSettings {
        fault: to_fault_settings(cfg),
        policies: to_recovery_policies(cfg),
        monitor_interval,
        queue_warn_depth: cfg.bus.queue_warn_depth,
        plugins: to_plugin_settings(cfg),
        component_config: to_component_config(cfg),
    }
}

/// Convert the `[fault]` section to [`FaultSettings`].
#[must_use]
pub fn to_fault_settings(cfg: &Config) -> FaultSettings {
    FaultSettings {
        history_capacity: cfg.fault.history_capacity,
        failure_penalty: cfg.fault.failure_penalty,
        recovery_threshold: cfg.fault.recovery_threshold,
        success_heal: cfg.fault.success_heal,
        release_boost: cfg.fault.release_boost,
    }
}

/// Convert every `[fault.policies.<component>]` table.
#[must_use]
pub fn to_recovery_policies(cfg: &Config) -> BTreeMap<String, RecoveryPolicy> {
    cfg.fault
        .policies
        .iter()
        .map(|(component, section)| (component.clone(), to_recovery_policy(component, section)))
        .collect()
}

/// Convert one policy table.
///
/// A configured degrade policy has no code to fall back to, so its fallback
/// logs each failure it absorbs.
#[must_use]
pub fn to_recovery_policy(component: &str, section: &PolicySection) -> RecoveryPolicy {
    match section.strategy {
        PolicyStrategy::Retry => RecoveryPolicy::Retry(
            RetrySettings::new(
                section.max_attempts,
                secs(section.delay_secs),
                section.backoff,
            )
            .with_max_delay(secs(section.max_delay_secs)),
        ),
        PolicyStrategy::Degrade => {
            let component = component.to_string();
            RecoveryPolicy::degrade(section.threshold, move |incident| {
                warn!(
                    component = %component,
                    incident = %incident,
                    "Degraded component absorbed a failure"
                );
            })
        },
        PolicyStrategy::Isolate => RecoveryPolicy::isolate(section.threshold),
    }
}

/// Convert the `[plugins]` section to [`PluginSettings`].
#[must_use]
pub fn to_plugin_settings(cfg: &Config) -> PluginSettings {
    PluginSettings {
        dirs: cfg.plugins.dirs.clone(),
        enabled: cfg.plugins.enabled.iter().cloned().collect(),
        disabled: cfg.plugins.disabled.iter().cloned().collect(),
        auto_load: cfg.plugins.auto_load,
        activate_on_load: cfg.plugins.activate_on_load,
    }
}

/// The `[components.<id>]` tables, keyed by plugin id.
#[must_use]
pub fn to_component_config(cfg: &Config) -> BTreeMap<String, Payload> {
    cfg.components
        .iter()
        .map(|(id, table)| (id.clone(), table.clone()))
        .collect()
}

/// Convert the `[logging]` section to [`LogConfig`].
#[must_use]
pub fn to_log_config(cfg: &Config) -> LogConfig {
    LogConfig::from(&cfg.logging)
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(text: &str) -> Config {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn test_defaults_match_domain_defaults() {
        let cfg = Config::default();
        assert_eq!(to_fault_settings(&cfg), FaultSettings::default());
        assert_eq!(to_plugin_settings(&cfg), PluginSettings::default());
        assert!(to_recovery_policies(&cfg).is_empty());
        assert!(to_component_config(&cfg).is_empty());
    }

    #[test]
    fn test_policy_conversion() {
        let cfg = config(
            r#"
            [fault.policies.camera]
            strategy = "retry"
            max_attempts = 5
            delay_secs = 0.5
            backoff = 3.0

            [fault.policies.bridge]
            strategy = "isolate"
            threshold = 2

            [fault.policies.screen]
            strategy = "degrade"
            threshold = 4
            "#,
        );
        let policies = to_recovery_policies(&cfg);
        assert_eq!(policies.len(), 3);

        match &policies["camera"] {
            RecoveryPolicy::Retry(settings) => {
                assert_eq!(settings.max_attempts, 5);
                assert_eq!(settings.delay, Duration::from_millis(500));
                assert!((settings.backoff - 3.0).abs() < f64::EPSILON);
            },
            other => panic!("unexpected policy {other:?}"),
        }
        assert!(matches!(policies["bridge"], RecoveryPolicy::Isolate { threshold: 2 }));
        assert!(matches!(policies["screen"], RecoveryPolicy::Degrade { threshold: 4, .. }));
    }

    #[test]
    fn test_runtime_settings_conversion() {
        let cfg = config(
            r#"
            [bus]
            queue_warn_depth = 64

            [fault]
            monitor_interval_secs = 0
            failure_penalty = 0.5

            [plugins]
            dirs = ["a", "b"]
            enabled = ["camera"]
            activate_on_load = true

            [components.camera]
            fps = 30
            "#,
        );
        let settings = to_runtime_settings(&cfg);
        assert_eq!(settings.queue_warn_depth, 64);
        assert!(settings.monitor_interval.is_none());
        assert!((settings.fault.failure_penalty - 0.5).abs() < f64::EPSILON);
        assert_eq!(settings.plugins.dirs.len(), 2);
        assert!(settings.plugins.enabled.contains("camera"));
        assert!(settings.plugins.activate_on_load);
        assert_eq!(settings.component_config["camera"]["fps"], json!(30));
    }

    #[test]
    fn test_monitor_interval_enabled() {
        let cfg = config("[fault]\nmonitor_interval_secs = 7\n");
        assert_eq!(
            to_runtime_settings(&cfg).monitor_interval,
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_log_config_conversion() {
        let cfg = config("[logging]\nlevel = \"debug\"\nformat = \"json\"\n");
        let log = to_log_config(&cfg);
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, synapse_telemetry::LogFormat::Json);
    }
}
