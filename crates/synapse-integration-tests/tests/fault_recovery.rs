//! Integration tests for recovery policies applied to live components.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use synapse_component::{ComponentError, ComponentKind};
use synapse_events::{Event, EventFilter, EventKind, Payload};
use synapse_fault::{
    FaultLayer, HealthMonitor, HealthStatus, Incident, IncidentKind, RecoveryPolicy,
    RetrySettings, component_health_check,
};
use synapse_test::prelude::*;

const WAIT: Duration = Duration::from_secs(2);

async fn activate_failing(
    coordinator: &synapse_component::Coordinator,
    name: &str,
) -> Arc<synapse_component::ComponentHandle> {
    let failing = FailingComponent::new(name, ComponentKind::Output, FailurePoint::Receive)
        .on(EventFilter::new().kinds([EventKind::Output]));
    let handle = coordinator.register(coordinator.handle(Box::new(failing))).unwrap();
    handle.initialize(&Payload::new()).await.unwrap();
    coordinator.activate(ComponentKind::Output, name).await.unwrap();
    handle
}

fn subtitle(text: &str) -> Event {
    Event::subtitle("bridge", text, 1.0)
}

#[tokio::test]
async fn test_isolate_quarantines_and_release_restores() {
    let (bus, coordinator) = test_coordinator();
    let fault = Arc::clone(coordinator.fault());
    fault.set_policy("screen", RecoveryPolicy::isolate(3));
    activate_failing(&coordinator, "screen").await;

    for i in 0..5 {
        bus.publish(subtitle(&i.to_string()));
    }

    assert!(wait_until(WAIT, || fault.is_quarantined("screen")).await);
    // Quarantined receptors are skipped, so the counter stops at the threshold.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fault.failure_count("screen"), 3);
    assert!(fault.health("screen").abs() < f64::EPSILON);
    assert_eq!(fault.stats().quarantined, ["screen"]);

    assert!(fault.release("screen"));
    assert!(!fault.is_quarantined("screen"));
    assert_eq!(fault.failure_count("screen"), 0);
    assert!((fault.health("screen") - 0.5).abs() < 1e-9);

    bus.publish(subtitle("again"));
    assert!(wait_until(WAIT, || fault.failure_count("screen") == 1).await);
    bus.stop().await;
}

#[tokio::test]
async fn test_quarantined_component_rejects_submit() {
    let (bus, coordinator) = test_coordinator();
    let component = RecordingComponent::new("camera", ComponentKind::Input);
    let handle = coordinator.register(coordinator.handle(Box::new(component))).unwrap();
    handle.initialize(&Payload::new()).await.unwrap();
    coordinator.activate(ComponentKind::Input, "camera").await.unwrap();

    coordinator.fault().quarantine("camera");
    let result = handle.submit(json!({"frame": 1})).await;
    assert!(matches!(result, Err(ComponentError::Quarantined(_))));

    coordinator.fault().release("camera");
    handle.submit(json!({"frame": 2})).await.unwrap();
    bus.stop().await;
}

#[tokio::test]
async fn test_degrade_calls_fallback_from_threshold() {
    let (bus, coordinator) = test_coordinator();
    let fault = Arc::clone(coordinator.fault());
    let absorbed = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&absorbed);
    fault.set_policy(
        "screen",
        RecoveryPolicy::degrade(2, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    activate_failing(&coordinator, "screen").await;

    for i in 0..4 {
        bus.publish(subtitle(&i.to_string()));
    }

    assert!(wait_until(WAIT, || fault.failure_count("screen") == 4).await);
    assert!(wait_until(WAIT, || absorbed.load(Ordering::SeqCst) == 3).await);
    assert!(fault.is_degraded("screen"));
    assert!(!fault.is_quarantined("screen"));
    bus.stop().await;
}

#[tokio::test]
async fn test_guard_retries_then_heals() {
    let fault = FaultLayer::default();
    fault.set_policy(
        "bridge",
        RecoveryPolicy::Retry(RetrySettings::new(3, Duration::from_millis(1), 2.0)),
    );

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let value = fault
        .guard("bridge", IncidentKind::Connector, move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(Incident::new(IncidentKind::Network, "connection refused"))
                } else {
                    Ok("connected")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "connected");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(fault.stats().total_incidents, 2);
    let recent = fault.recent_incidents();
    assert!(recent.iter().all(|i| i.kind() == IncidentKind::Network));
    assert!(recent.iter().all(|i| i.component() == Some("bridge")));
}

#[tokio::test]
async fn test_guard_gives_up_after_bound() {
    let fault = FaultLayer::default();
    fault.set_policy(
        "bridge",
        RecoveryPolicy::Retry(RetrySettings::new(2, Duration::from_millis(1), 1.0)),
    );

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let result: Result<(), Incident> = fault
        .guard("bridge", IncidentKind::Connector, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(std::io::Error::other("timeout")) }
        })
        .await;

    let incident = result.unwrap_err();
    assert_eq!(incident.kind(), IncidentKind::Connector);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(fault.failure_count("bridge"), 3);
}

#[tokio::test]
async fn test_monitor_reports_quarantine_as_critical() {
    let fault = Arc::new(FaultLayer::default());
    let monitor = HealthMonitor::new(Duration::from_millis(10));
    monitor.register(component_health_check(Arc::clone(&fault))).unwrap();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    monitor.add_listener(move |name, status, _| {
        sink.lock().unwrap().push((name.to_string(), status));
    });

    monitor.run_all();
    assert_eq!(monitor.overall(), HealthStatus::Healthy);

    fault.quarantine("camera");
    monitor.run_all();
    assert_eq!(monitor.overall(), HealthStatus::Critical);
    assert!(monitor.status()[0].message.contains("camera"));
    assert_eq!(
        seen.lock().unwrap().last().cloned(),
        Some(("component_health".to_string(), HealthStatus::Critical))
    );
}
