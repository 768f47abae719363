//! Periodic health checks.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{FaultError, FaultResult};
use crate::incident::{Incident, IncidentKind};
use crate::layer::FaultLayer;

/// Result of a health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything is fine.
    Healthy,
    /// The check has not run yet, or failed to run.
    #[default]
    Unknown,
    /// Degraded but working.
    Warning,
    /// Needs attention.
    Critical,
}

type CheckFn = Arc<dyn Fn() -> (HealthStatus, String) + Send + Sync>;

/// Called with `(check name, status, message)` after every check run.
pub type StatusListener = Arc<dyn Fn(&str, HealthStatus, &str) + Send + Sync>;

/// A named check run every `interval`.
#[derive(Clone)]
pub struct HealthCheck {
    name: String,
    description: String,
    interval: Duration,
    check: CheckFn,
}

impl HealthCheck {
    /// Create a check running every 60 seconds.
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> (HealthStatus, String) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            interval: Duration::from_secs(60),
            check: Arc::new(check),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Check name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthCheck")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Latest outcome of a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    /// Check name.
    pub name: String,
    /// Check description.
    pub description: String,
    /// Interval in seconds.
    pub interval_secs: f64,
    /// Latest status.
    pub status: HealthStatus,
    /// Latest message.
    pub message: String,
    /// When the check last ran.
    pub checked_at: Option<DateTime<Utc>>,
    /// Consecutive warning results.
    pub consecutive_warnings: u32,
    /// Consecutive critical results.
    pub consecutive_criticals: u32,
}

struct CheckSlot {
    check: HealthCheck,
    last_run: Option<Instant>,
    report: CheckReport,
}

impl CheckSlot {
    fn new(check: HealthCheck) -> Self {
        let report = CheckReport {
            name: check.name.clone(),
            description: check.description.clone(),
            interval_secs: check.interval.as_secs_f64(),
            status: HealthStatus::Unknown,
            message: "not yet checked".to_string(),
            checked_at: None,
            consecutive_warnings: 0,
            consecutive_criticals: 0,
        };
        Self {
            check,
            last_run: None,
            report,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        self.last_run
            .is_none_or(|last| now.duration_since(last) >= self.check.interval)
    }

    fn run(&mut self, now: Instant) -> CheckReport {
        self.last_run = Some(now);
        let (status, message) =
            match std::panic::catch_unwind(AssertUnwindSafe(|| (self.check.check)())) {
                Ok(outcome) => outcome,
                Err(_) => (
                    HealthStatus::Unknown,
                    "health check panicked".to_string(),
                ),
            };

        let report = &mut self.report;
        match status {
            HealthStatus::Warning => {
                report.consecutive_warnings = report.consecutive_warnings.saturating_add(1);
                report.consecutive_criticals = 0;
            },
            HealthStatus::Critical => {
                report.consecutive_criticals = report.consecutive_criticals.saturating_add(1);
                report.consecutive_warnings = 0;
            },
            HealthStatus::Healthy | HealthStatus::Unknown => {
                report.consecutive_warnings = 0;
                report.consecutive_criticals = 0;
            },
        }
        report.status = status;
        report.message = message;
        report.checked_at = Some(Utc::now());
        report.clone()
    }
}

struct MonitorInner {
    checks: Mutex<Vec<CheckSlot>>,
    listeners: RwLock<Vec<StatusListener>>,
    fault: Option<Arc<FaultLayer>>,
}

/// Shortest tick the background loop accepts.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Runs registered health checks on a fixed tick.
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    tick: Duration,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl HealthMonitor {
    /// Create a monitor that wakes every `tick` to run due checks.
    ///
    /// A tick shorter than [`MIN_TICK`] is raised to it.
    #[must_use]
    pub fn new(tick: Duration) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                checks: Mutex::new(Vec::new()),
                listeners: RwLock::new(Vec::new()),
                fault: None,
            }),
            tick: tick.max(MIN_TICK),
            worker: Mutex::new(None),
        }
    }

    /// How often the background loop wakes.
    #[must_use]
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Report critical results to a fault layer as system incidents.
    #[must_use]
    pub fn with_fault_layer(mut self, fault: Arc<FaultLayer>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.fault = Some(fault);
        }
        self
    }

    /// Register a check.
    ///
    /// # Errors
    ///
    /// Returns [`FaultError::DuplicateCheck`] if the name is taken.
    pub fn register(&self, check: HealthCheck) -> FaultResult<()> {
        let mut checks = self
            .inner
            .checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if checks.iter().any(|slot| slot.check.name == check.name) {
            return Err(FaultError::DuplicateCheck(check.name));
        }
        debug!(check = %check.name, "Health check registered");
        checks.push(CheckSlot::new(check));
        Ok(())
    }

    /// Add a status listener.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&str, HealthStatus, &str) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Run every check now, regardless of its interval.
    pub fn run_all(&self) -> Vec<CheckReport> {
        self.inner.run(true)
    }

    /// Latest report of every check.
    #[must_use]
    pub fn status(&self) -> Vec<CheckReport> {
        self.inner
            .checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|slot| slot.report.clone())
            .collect()
    }

    /// Worst latest status across all checks; healthy when none are registered.
    #[must_use]
    pub fn overall(&self) -> HealthStatus {
        self.status()
            .into_iter()
            .map(|r| r.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Start the background loop. Must be called within a Tokio runtime.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            warn!("Health monitor already running");
            return;
        }
        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let tick = self.tick;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        inner.run(false);
                    },
                }
            }
            debug!("Health monitor loop exited");
        });
        *worker = Some((cancel, handle));
        let tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
        info!(tick_ms, "Health monitor started");
    }

    /// Stop the background loop and wait for it.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((cancel, handle)) = worker else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await
            && e.is_panic()
        {
            error!(error = %e, "Health monitor loop panicked");
        }
        info!("Health monitor stopped");
    }

    /// Whether the background loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("tick", &self.tick)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl MonitorInner {
    fn run(&self, force: bool) -> Vec<CheckReport> {
        let now = Instant::now();
        let reports: Vec<CheckReport> = {
            let mut checks = self.checks.lock().unwrap_or_else(PoisonError::into_inner);
            checks
                .iter_mut()
                .filter(|slot| force || slot.is_due(now))
                .map(|slot| slot.run(now))
                .collect()
        };

        let listeners: Vec<StatusListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for report in &reports {
            match report.status {
                HealthStatus::Critical => {
                    error!(check = %report.name, "Health check critical: {}", report.message);
                    if let Some(fault) = &self.fault {
                        fault.handle(
                            &Incident::new(
                                IncidentKind::System,
                                format!("health check '{}' critical: {}", report.name, report.message),
                            )
                            .with_recovery_hint("inspect the failing subsystem"),
                        );
                    }
                },
                HealthStatus::Warning => {
                    warn!(check = %report.name, "Health check warning: {}", report.message);
                },
                HealthStatus::Healthy | HealthStatus::Unknown => {
                    debug!(check = %report.name, status = ?report.status, "{}", report.message);
                },
            }

            for listener in &listeners {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    listener(&report.name, report.status, &report.message);
                }));
                if outcome.is_err() {
                    warn!(check = %report.name, "Health status listener panicked");
                }
            }
        }
        reports
    }
}

/// Check that watches component health in a fault layer.
///
/// Critical while any component is quarantined, warning while any health
/// score is below 0.5.
#[must_use]
pub fn component_health_check(fault: Arc<FaultLayer>) -> HealthCheck {
    HealthCheck::new("component_health", move || {
        let stats = fault.stats();
        if !stats.quarantined.is_empty() {
            return (
                HealthStatus::Critical,
                format!("quarantined: {}", stats.quarantined.join(", ")),
            );
        }
        let weak: Vec<String> = stats
            .components
            .iter()
            .filter(|(_, health)| health.health < 0.5)
            .map(|(name, health)| format!("{name} ({:.2})", health.health))
            .collect();
        if weak.is_empty() {
            (
                HealthStatus::Healthy,
                format!("{} components healthy", stats.components.len()),
            )
        } else {
            (HealthStatus::Warning, format!("low health: {}", weak.join(", ")))
        }
    })
    .with_description("Health scores tracked by the fault layer")
    .with_interval(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RecoveryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_duplicate() {
        let monitor = HealthMonitor::new(Duration::from_secs(1));
        monitor
            .register(HealthCheck::new("a", || (HealthStatus::Healthy, "ok".into())))
            .unwrap();
        let err = monitor
            .register(HealthCheck::new("a", || (HealthStatus::Healthy, "ok".into())))
            .unwrap_err();
        assert!(matches!(err, FaultError::DuplicateCheck(name) if name == "a"));
    }

    #[test]
    fn test_consecutive_counters() {
        let monitor = HealthMonitor::new(Duration::from_secs(1));
        let n = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&n);
        monitor
            .register(HealthCheck::new("flappy", move || {
                match c.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => (HealthStatus::Warning, "slow".into()),
                    2 => (HealthStatus::Critical, "down".into()),
                    _ => (HealthStatus::Healthy, "fine".into()),
                }
            }))
            .unwrap();

        monitor.run_all();
        let report = &monitor.run_all()[0];
        assert_eq!(report.consecutive_warnings, 2);

        let report = &monitor.run_all()[0];
        assert_eq!(report.status, HealthStatus::Critical);
        assert_eq!(report.consecutive_criticals, 1);
        assert_eq!(report.consecutive_warnings, 0);
        assert_eq!(monitor.overall(), HealthStatus::Critical);

        let report = &monitor.run_all()[0];
        assert_eq!(report.consecutive_criticals, 0);
        assert_eq!(monitor.overall(), HealthStatus::Healthy);
    }

    #[test]
    fn test_panicking_check_and_listener_isolated() {
        let monitor = HealthMonitor::new(Duration::from_secs(1));
        monitor
            .register(HealthCheck::new("broken", || panic!("check exploded")))
            .unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        monitor.add_listener(|_, _, _| panic!("listener exploded"));
        let s = Arc::clone(&seen);
        monitor.add_listener(move |name, status, _| {
            assert_eq!(name, "broken");
            assert_eq!(status, HealthStatus::Unknown);
            s.fetch_add(1, Ordering::SeqCst);
        });

        let reports = monitor.run_all();
        assert_eq!(reports[0].status, HealthStatus::Unknown);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_component_health_check() {
        let fault = Arc::new(FaultLayer::default());
        let monitor = HealthMonitor::new(Duration::from_secs(1)).with_fault_layer(Arc::clone(&fault));
        monitor.register(component_health_check(Arc::clone(&fault))).unwrap();

        assert_eq!(monitor.run_all()[0].status, HealthStatus::Healthy);

        for _ in 0..3 {
            fault.handle(&Incident::new(IncidentKind::Network, "x").with_component("chat"));
        }
        assert_eq!(monitor.run_all()[0].status, HealthStatus::Warning);

        fault.set_policy("chat", RecoveryPolicy::isolate(1));
        fault.handle(&Incident::new(IncidentKind::Network, "x").with_component("chat"));
        let before = fault.stats().total_incidents;
        let report = &monitor.run_all()[0];
        assert_eq!(report.status, HealthStatus::Critical);
        assert!(report.message.contains("chat"));
        // Critical results are reported back as system incidents.
        assert_eq!(fault.stats().total_incidents, before.saturating_add(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_respects_interval() {
        let monitor = HealthMonitor::new(Duration::from_millis(100));
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        monitor
            .register(
                HealthCheck::new("tick", move || {
                    r.fetch_add(1, Ordering::SeqCst);
                    (HealthStatus::Healthy, "ok".into())
                })
                .with_interval(Duration::from_millis(500)),
            )
            .unwrap();

        monitor.start();
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_millis(1050)).await;
        monitor.stop().await;
        assert!(!monitor.is_running());

        let count = runs.load(Ordering::SeqCst);
        assert!((2..=3).contains(&count), "ran {count} times");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_tick_is_clamped() {
        let monitor = HealthMonitor::new(Duration::ZERO);
        assert_eq!(monitor.tick(), MIN_TICK);

        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        monitor
            .register(
                HealthCheck::new("zero", move || {
                    r.fetch_add(1, Ordering::SeqCst);
                    (HealthStatus::Healthy, "ok".into())
                })
                .with_interval(Duration::ZERO),
            )
            .unwrap();

        monitor.start();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(monitor.is_running());
        monitor.stop().await;
        assert!(runs.load(Ordering::SeqCst) >= 1);
    }
}
