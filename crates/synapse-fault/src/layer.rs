//! The fault layer: incident history, health records, handlers and policies.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{FaultError, FaultResult};
use crate::incident::{Incident, IncidentKind, IncidentRecord};
use crate::policy::{Fallback, RecoveryPolicy, RetrySettings};

/// Result returned by incident handlers.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Callback notified of incidents.
pub type IncidentHandler = Arc<dyn Fn(&Incident) -> HandlerResult + Send + Sync>;

/// Which incidents a handler receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerScope {
    /// Only incidents of this kind.
    Kind(IncidentKind),
    /// Every incident, after the kind-specific handlers.
    Any,
}

/// Tunables of the fault layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultSettings {
    /// Number of recent incidents kept.
    pub history_capacity: usize,
    /// Health lost per failure.
    pub failure_penalty: f64,
    /// Health above which the failure counter resets on heal.
    pub recovery_threshold: f64,
    /// Health regained by a successful guarded operation.
    pub success_heal: f64,
    /// Health regained on release from quarantine.
    pub release_boost: f64,
}

impl Default for FaultSettings {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            failure_penalty: 0.2,
            recovery_threshold: 0.8,
            success_heal: 0.05,
            release_boost: 0.5,
        }
    }
}

impl FaultSettings {
    /// Check the settings are within range.
    ///
    /// # Errors
    ///
    /// Returns [`FaultError::InvalidSettings`] naming the first bad field.
    pub fn validate(&self) -> FaultResult<()> {
        let unit = |name: &str, value: f64, allow_zero: bool| {
            let low_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
            if low_ok && value <= 1.0 {
                Ok(())
            } else {
                Err(FaultError::InvalidSettings(format!(
                    "{name} must be within {}0, 1], got {value}",
                    if allow_zero { "[" } else { "(" }
                )))
            }
        };
        if self.history_capacity == 0 {
            return Err(FaultError::InvalidSettings(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        unit("failure_penalty", self.failure_penalty, false)?;
        unit("recovery_threshold", self.recovery_threshold, true)?;
        unit("success_heal", self.success_heal, true)?;
        unit("release_boost", self.release_boost, true)
    }
}

#[derive(Debug, Clone)]
struct HealthRecord {
    health: f64,
    failures: u32,
    last_failure: Option<DateTime<Utc>>,
    quarantined: bool,
    degraded: bool,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            health: 1.0,
            failures: 0,
            last_failure: None,
            quarantined: false,
            degraded: false,
        }
    }
}

/// Health snapshot of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Health score in `[0, 1]`.
    pub health: f64,
    /// Failures since the counter was last reset.
    pub failures: u32,
    /// Time of the most recent failure.
    pub last_failure: Option<DateTime<Utc>>,
    /// Excluded from dispatch until released.
    pub quarantined: bool,
    /// Running on its degrade fallback.
    pub degraded: bool,
    /// Name of the registered policy.
    pub policy: Option<String>,
}

/// Snapshot of the fault layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultStats {
    /// Incidents handled since creation.
    pub total_incidents: u64,
    /// Incidents per kind.
    pub by_kind: BTreeMap<IncidentKind, u64>,
    /// Per-component health.
    pub components: BTreeMap<String, ComponentHealth>,
    /// Quarantined components.
    pub quarantined: Vec<String>,
    /// The most recent incidents, oldest first.
    pub recent: Vec<IncidentRecord>,
}

enum PolicyAction {
    None,
    Fallback(Fallback),
    Quarantine,
}

/// Converts failures into health changes and recovery actions.
///
/// Safe to share across tasks. Health records live in a concurrent map; no
/// lock is held while handlers or fallbacks run.
pub struct FaultLayer {
    settings: FaultSettings,
    records: DashMap<String, HealthRecord>,
    policies: DashMap<String, RecoveryPolicy>,
    handlers: RwLock<HashMap<HandlerScope, Vec<IncidentHandler>>>,
    recent: Mutex<VecDeque<Incident>>,
    by_kind: Mutex<BTreeMap<IncidentKind, u64>>,
    total: AtomicU64,
}

impl FaultLayer {
    /// Create a fault layer with the given settings.
    #[must_use]
    pub fn new(settings: FaultSettings) -> Self {
        Self {
            settings,
            records: DashMap::new(),
            policies: DashMap::new(),
            handlers: RwLock::new(HashMap::new()),
            recent: Mutex::new(VecDeque::new()),
            by_kind: Mutex::new(BTreeMap::new()),
            total: AtomicU64::new(0),
        }
    }

    /// Active settings.
    #[must_use]
    pub fn settings(&self) -> &FaultSettings {
        &self.settings
    }

    /// Register a handler.
    pub fn register_handler<F>(&self, scope: HandlerScope, handler: F)
    where
        F: Fn(&Incident) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(scope)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Set the recovery policy of a component, replacing any previous one.
    pub fn set_policy(&self, component: impl Into<String>, policy: RecoveryPolicy) {
        let component = component.into();
        info!(component = %component, policy = policy.name(), "Recovery policy registered");
        self.policies.insert(component, policy);
    }

    /// Remove the recovery policy of a component.
    pub fn remove_policy(&self, component: &str) -> Option<RecoveryPolicy> {
        self.policies.remove(component).map(|(_, policy)| policy)
    }

    /// Retry settings of the component's policy, if it is a retry policy.
    #[must_use]
    pub fn retry_settings(&self, component: &str) -> Option<RetrySettings> {
        self.policies
            .get(component)
            .and_then(|policy| match policy.value() {
                RecoveryPolicy::Retry(settings) => Some(settings.clone()),
                _ => None,
            })
    }

    /// Record an incident and run handlers and policies.
    pub fn handle(&self, incident: &Incident) {
        self.total.fetch_add(1, Ordering::AcqRel);
        {
            let mut by_kind = self.by_kind.lock().unwrap_or_else(PoisonError::into_inner);
            let count = by_kind.entry(incident.kind()).or_default();
            *count = count.saturating_add(1);
        }
        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            while recent.len() >= self.settings.history_capacity {
                recent.pop_front();
            }
            recent.push_back(incident.clone());
        }

        error!(
            kind = %incident.kind(),
            component = incident.component().unwrap_or("-"),
            hint = incident.recovery_hint().unwrap_or("-"),
            "{}",
            incident.message()
        );

        if let Some(component) = incident.component() {
            let mut record = self.records.entry(component.to_string()).or_default();
            record.health = (record.health - self.settings.failure_penalty).max(0.0);
            record.failures = record.failures.saturating_add(1);
            record.last_failure = Some(incident.timestamp());
            debug!(
                component,
                health = record.health,
                failures = record.failures,
                "Component health decreased"
            );
        }

        self.notify_handlers(incident);

        if let Some(component) = incident.component() {
            self.apply_policy(component, incident);
        }
    }

    fn notify_handlers(&self, incident: &Incident) {
        let selected: Vec<IncidentHandler> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            [HandlerScope::Kind(incident.kind()), HandlerScope::Any]
                .iter()
                .filter_map(|scope| handlers.get(scope))
                .flat_map(|list| list.iter().cloned())
                .collect()
        };

        for handler in selected {
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler(incident))) {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!(kind = %incident.kind(), error = %e, "Incident handler failed"),
                Err(_) => warn!(kind = %incident.kind(), "Incident handler panicked"),
            }
        }
    }

    fn apply_policy(&self, component: &str, incident: &Incident) {
        let action = {
            let Some(policy) = self.policies.get(component) else {
                return;
            };
            let Some(mut record) = self.records.get_mut(component) else {
                return;
            };
            match policy.value() {
                RecoveryPolicy::Retry(_) => PolicyAction::None,
                RecoveryPolicy::Degrade {
                    threshold,
                    fallback,
                } if record.failures >= *threshold => {
                    if !record.degraded {
                        record.degraded = true;
                        warn!(component, failures = record.failures, "Component degraded, using fallback");
                    }
                    PolicyAction::Fallback(Arc::clone(fallback))
                },
                RecoveryPolicy::Isolate { threshold }
                    if record.failures >= *threshold && !record.quarantined =>
                {
                    PolicyAction::Quarantine
                },
                _ => PolicyAction::None,
            }
        };

        match action {
            PolicyAction::None => {},
            PolicyAction::Quarantine => self.quarantine(component),
            PolicyAction::Fallback(fallback) => {
                if std::panic::catch_unwind(AssertUnwindSafe(|| fallback(incident))).is_err() {
                    warn!(component, "Degrade fallback panicked");
                }
            },
        }
    }

    /// Quarantine a component: health drops to zero and it stays excluded
    /// from dispatch until [`release`](Self::release)d.
    pub fn quarantine(&self, component: &str) {
        let mut record = self.records.entry(component.to_string()).or_default();
        if record.quarantined {
            return;
        }
        record.quarantined = true;
        record.health = 0.0;
        warn!(component, failures = record.failures, "Component quarantined");
    }

    /// Release a component from quarantine. Returns whether it was
    /// quarantined.
    pub fn release(&self, component: &str) -> bool {
        let Some(mut record) = self.records.get_mut(component) else {
            return false;
        };
        let was_quarantined = record.quarantined;
        record.quarantined = false;
        record.degraded = false;
        record.failures = 0;
        record.health = (record.health + self.settings.release_boost).min(1.0);
        info!(component, health = record.health, "Component released");
        was_quarantined
    }

    /// Raise a component's health by `amount`, capped at 1.0.
    ///
    /// The failure counter resets once health exceeds the recovery threshold.
    /// Quarantined components do not heal.
    pub fn heal(&self, component: &str, amount: f64) {
        let mut record = self.records.entry(component.to_string()).or_default();
        if record.quarantined {
            debug!(component, "Quarantined component not healed");
            return;
        }
        record.health = (record.health + amount.max(0.0)).min(1.0);
        if record.health > self.settings.recovery_threshold && record.failures > 0 {
            record.failures = 0;
            record.degraded = false;
            debug!(component, health = record.health, "Component recovered");
        }
    }

    /// Health of a component. Untracked components are fully healthy.
    #[must_use]
    pub fn health(&self, component: &str) -> f64 {
        self.records.get(component).map_or(1.0, |r| r.health)
    }

    /// Failures since the counter was last reset.
    #[must_use]
    pub fn failure_count(&self, component: &str) -> u32 {
        self.records.get(component).map_or(0, |r| r.failures)
    }

    /// Whether the component is quarantined.
    #[must_use]
    pub fn is_quarantined(&self, component: &str) -> bool {
        self.records.get(component).is_some_and(|r| r.quarantined)
    }

    /// Whether the component's degrade fallback is active.
    #[must_use]
    pub fn is_degraded(&self, component: &str) -> bool {
        self.records.get(component).is_some_and(|r| r.degraded)
    }

    /// Recent incidents, oldest first.
    #[must_use]
    pub fn recent_incidents(&self) -> Vec<Incident> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Forget the health record of a component.
    pub fn forget(&self, component: &str) {
        self.records.remove(component);
    }

    /// Snapshot of everything the layer tracks.
    #[must_use]
    pub fn stats(&self) -> FaultStats {
        let mut components = BTreeMap::new();
        let mut quarantined = Vec::new();
        for entry in &self.records {
            let record = entry.value();
            if record.quarantined {
                quarantined.push(entry.key().clone());
            }
            components.insert(
                entry.key().clone(),
                ComponentHealth {
                    health: record.health,
                    failures: record.failures,
                    last_failure: record.last_failure,
                    quarantined: record.quarantined,
                    degraded: record.degraded,
                    policy: self
                        .policies
                        .get(entry.key())
                        .map(|p| p.name().to_string()),
                },
            );
        }
        quarantined.sort();

        FaultStats {
            total_incidents: self.total.load(Ordering::Acquire),
            by_kind: self
                .by_kind
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            components,
            quarantined,
            recent: self
                .recent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(Incident::to_record)
                .collect(),
        }
    }
}

impl Default for FaultLayer {
    fn default() -> Self {
        Self::new(FaultSettings::default())
    }
}

impl std::fmt::Debug for FaultLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultLayer")
            .field("settings", &self.settings)
            .field("tracked_components", &self.records.len())
            .field("policies", &self.policies.len())
            .field("total_incidents", &self.total.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn failure(component: &str) -> Incident {
        Incident::new(IncidentKind::OutputSink, "render failed").with_component(component)
    }

    #[test]
    fn test_failure_decrements_health() {
        let fault = FaultLayer::default();
        fault.handle(&failure("subtitle"));
        assert!((fault.health("subtitle") - 0.8).abs() < 1e-9);
        assert_eq!(fault.failure_count("subtitle"), 1);

        for _ in 0..10 {
            fault.handle(&failure("subtitle"));
        }
        assert!(fault.health("subtitle").abs() < 1e-9);
        assert_eq!(fault.failure_count("subtitle"), 11);
    }

    #[test]
    fn test_incident_without_component_only_recorded() {
        let fault = FaultLayer::default();
        fault.handle(&Incident::new(IncidentKind::System, "boot"));
        assert_eq!(fault.recent_incidents().len(), 1);
        assert!(fault.stats().components.is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let fault = FaultLayer::new(FaultSettings {
            history_capacity: 3,
            ..FaultSettings::default()
        });
        for i in 0..5 {
            fault.handle(&Incident::new(IncidentKind::Unknown, format!("n{i}")));
        }
        let recent = fault.recent_incidents();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message(), "n2");
        assert_eq!(recent[2].message(), "n4");
        assert_eq!(fault.stats().total_incidents, 5);
    }

    #[test]
    fn test_handlers_kind_then_wildcard() {
        let fault = FaultLayer::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        fault.register_handler(HandlerScope::Any, move |_| {
            o.lock().unwrap().push("any");
            Ok(())
        });
        let o = Arc::clone(&order);
        fault.register_handler(HandlerScope::Kind(IncidentKind::Network), move |_| {
            o.lock().unwrap().push("network");
            Ok(())
        });
        let o = Arc::clone(&order);
        fault.register_handler(HandlerScope::Kind(IncidentKind::Resource), move |_| {
            o.lock().unwrap().push("resource");
            Ok(())
        });

        fault.handle(&Incident::new(IncidentKind::Network, "down"));
        assert_eq!(*order.lock().unwrap(), vec!["network", "any"]);
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let fault = FaultLayer::default();
        let hits = Arc::new(AtomicUsize::new(0));
        fault.register_handler(HandlerScope::Any, |_| Err("handler broke".into()));
        fault.register_handler(HandlerScope::Any, |_| panic!("handler panicked"));
        let h = Arc::clone(&hits);
        fault.register_handler(HandlerScope::Any, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        fault.handle(&failure("x"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_isolate_policy_quarantines_at_threshold() {
        let fault = FaultLayer::default();
        fault.set_policy("chat", RecoveryPolicy::isolate(3));

        fault.handle(&failure("chat"));
        fault.handle(&failure("chat"));
        assert!(!fault.is_quarantined("chat"));
        fault.handle(&failure("chat"));
        assert!(fault.is_quarantined("chat"));
        assert!(fault.health("chat").abs() < 1e-9);

        // Stays quarantined and does not heal.
        fault.heal("chat", 1.0);
        assert!(fault.is_quarantined("chat"));
        assert!(fault.health("chat").abs() < 1e-9);

        assert!(fault.release("chat"));
        assert!(!fault.is_quarantined("chat"));
        assert_eq!(fault.failure_count("chat"), 0);
        assert!((fault.health("chat") - 0.5).abs() < 1e-9);
        assert!(!fault.release("chat"));
    }

    #[test]
    fn test_degrade_policy_calls_fallback() {
        let fault = FaultLayer::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        fault.set_policy(
            "avatar",
            RecoveryPolicy::degrade(2, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        fault.handle(&failure("avatar"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!fault.is_degraded("avatar"));

        fault.handle(&failure("avatar"));
        fault.handle(&failure("avatar"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(fault.is_degraded("avatar"));
        assert!(!fault.is_quarantined("avatar"));
    }

    #[test]
    fn test_fallback_may_reenter_layer() {
        let fault = Arc::new(FaultLayer::default());
        let inner = Arc::downgrade(&fault);
        fault.set_policy(
            "x",
            RecoveryPolicy::degrade(1, move |_| {
                if let Some(fault) = inner.upgrade() {
                    fault.heal("x", 0.01);
                }
            }),
        );
        fault.handle(&failure("x"));
        assert!(fault.is_degraded("x"));
    }

    #[test]
    fn test_heal_resets_counter_above_threshold() {
        let fault = FaultLayer::default();
        fault.handle(&failure("x"));
        fault.handle(&failure("x"));
        assert_eq!(fault.failure_count("x"), 2);

        fault.heal("x", 0.1);
        assert_eq!(fault.failure_count("x"), 2);
        fault.heal("x", 0.15);
        assert!(fault.health("x") > 0.8);
        assert_eq!(fault.failure_count("x"), 0);

        fault.heal("x", 5.0);
        assert!((fault.health("x") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_untracked_component_defaults() {
        let fault = FaultLayer::default();
        assert!((fault.health("ghost") - 1.0).abs() < f64::EPSILON);
        assert_eq!(fault.failure_count("ghost"), 0);
        assert!(!fault.is_quarantined("ghost"));
    }

    #[test]
    fn test_stats_snapshot() {
        let fault = FaultLayer::default();
        fault.set_policy("a", RecoveryPolicy::isolate(1));
        fault.handle(&failure("a"));
        fault.handle(&Incident::new(IncidentKind::Network, "n").with_component("b"));

        let stats = fault.stats();
        assert_eq!(stats.total_incidents, 2);
        assert_eq!(stats.quarantined, vec!["a".to_string()]);
        assert_eq!(stats.by_kind.get(&IncidentKind::Network), Some(&1));
        assert_eq!(stats.components["a"].policy.as_deref(), Some("isolate"));
        assert_eq!(stats.recent.len(), 2);
    }

    #[test]
    fn test_settings_validation() {
        assert!(FaultSettings::default().validate().is_ok());
        let bad = FaultSettings {
            failure_penalty: 0.0,
            ..FaultSettings::default()
        };
        assert!(matches!(bad.validate(), Err(FaultError::InvalidSettings(_))));
        let bad = FaultSettings {
            history_capacity: 0,
            ..FaultSettings::default()
        };
        assert!(bad.validate().is_err());
    }
}
