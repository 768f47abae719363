//! Integration tests for event dispatch across components.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use synapse_component::ComponentKind;
use synapse_events::{Event, EventFilter, EventKind, Payload, Receptor};
use synapse_test::prelude::*;

const WAIT: Duration = Duration::from_secs(2);

fn text(value: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("text".into(), json!(value));
    payload
}

#[tokio::test]
async fn test_events_arrive_in_publish_order() {
    init_test_tracing();
    let (bus, _coordinator) = test_coordinator();
    let (receptor, log) = collecting_receptor(EventFilter::new().kinds([EventKind::Input]));
    bus.subscribe(receptor);

    for i in 0..20 {
        assert!(bus.publish(Event::input("mic", text(&i.to_string()))));
        bus.publish(Event::system("runtime", Payload::new()));
    }

    assert!(wait_until(WAIT, || log.len() == 20).await);
    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(log.strings("text"), expected);
    bus.stop().await;
}

#[tokio::test]
async fn test_source_filter_routes_events() {
    let (bus, _coordinator) = test_coordinator();
    let (camera, camera_log) = collecting_receptor(EventFilter::new().source("camera"));
    let (all, all_log) = collecting_receptor(EventFilter::new());
    bus.subscribe(camera);
    bus.subscribe(all);

    bus.publish(Event::input("camera", text("frame")));
    bus.publish(Event::input("mic", text("hello")));

    assert!(wait_until(WAIT, || all_log.len() == 2).await);
    assert!(wait_until(WAIT, || camera_log.len() == 1).await);
    assert_eq!(camera_log.strings("text"), ["frame"]);
    bus.stop().await;
}

#[tokio::test]
async fn test_failing_receptors_do_not_stop_dispatch() {
    let (bus, coordinator) = test_coordinator();
    let log = EventLog::new();

    for (name, point) in [("broken", FailurePoint::Receive), ("crashy", FailurePoint::Panic)] {
        let failing = FailingComponent::new(name, ComponentKind::Output, point)
            .on(EventFilter::new().kinds([EventKind::Input]));
        coordinator.register(coordinator.handle(Box::new(failing))).unwrap();
    }
    let healthy = RecordingComponent::new("screen", ComponentKind::Output)
        .listening(EventFilter::new().kinds([EventKind::Input]), log.clone());
    coordinator.register(coordinator.handle(Box::new(healthy))).unwrap();

    for name in ["broken", "crashy", "screen"] {
        coordinator
            .find(name)
            .unwrap()
            .initialize(&Payload::new())
            .await
            .unwrap();
    }
    assert!(coordinator.activate_all().await.is_complete());

    bus.publish(Event::input("mic", text("one")));
    bus.publish(Event::input("mic", text("two")));

    assert!(wait_until(WAIT, || log.len() == 2).await);
    assert_eq!(log.strings("text"), ["one", "two"]);

    let fault = coordinator.fault();
    assert!(wait_until(WAIT, || fault.failure_count("crashy") == 2).await);
    assert_eq!(fault.failure_count("broken"), 2);
    assert!(wait_until(WAIT, || bus.stats().receptor_failures >= 4).await);

    coordinator.deactivate_all().await;
    bus.stop().await;
}

#[tokio::test]
async fn test_sync_receptors_run_in_subscription_order() {
    let (bus, _coordinator) = test_coordinator();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        bus.subscribe(Receptor::sync(move |_| {
            order.lock().unwrap().push(label);
            Ok(())
        }));
    }

    bus.publish_now(Event::system("test", Payload::new())).await;
    assert_eq!(*order.lock().unwrap(), ["first", "second", "third"]);
    bus.stop().await;
}

#[tokio::test]
async fn test_deactivated_component_stops_receiving() {
    let (bus, coordinator) = test_coordinator();
    let log = EventLog::new();
    let component = RecordingComponent::new("screen", ComponentKind::Output)
        .listening(EventFilter::new(), log.clone());
    let handle = coordinator.register(coordinator.handle(Box::new(component))).unwrap();
    handle.initialize(&Payload::new()).await.unwrap();
    coordinator.activate(ComponentKind::Output, "screen").await.unwrap();

    bus.publish(Event::output("bridge", text("before")));
    assert!(wait_until(WAIT, || log.len() == 1).await);

    coordinator.deactivate(ComponentKind::Output, "screen").await.unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    bus.subscribe(Receptor::sync(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    bus.publish(Event::output("bridge", text("after")));

    assert!(wait_until(WAIT, || delivered.load(Ordering::SeqCst) == 1).await);
    assert_eq!(log.strings("text"), ["before"]);
    bus.stop().await;
}
