//! Test harness helpers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use synapse_component::Coordinator;
use synapse_events::EventBus;
use synapse_fault::{FaultLayer, FaultSettings};
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once per process.
///
/// Later calls are no-ops. The filter comes from `RUST_LOG`, falling back
/// to `synapse=debug`.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("synapse=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A started bus and a coordinator over it with default fault settings.
///
/// Must be called inside a Tokio runtime.
#[must_use]
pub fn test_coordinator() -> (EventBus, Arc<Coordinator>) {
    test_coordinator_with(FaultSettings::default())
}

/// Like [`test_coordinator`], with custom fault settings.
#[must_use]
pub fn test_coordinator_with(settings: FaultSettings) -> (EventBus, Arc<Coordinator>) {
    let bus = EventBus::new();
    bus.start();
    let fault = Arc::new(FaultLayer::new(settings));
    let coordinator = Arc::new(Coordinator::new(bus.clone(), fault));
    (bus, coordinator)
}

/// Poll `condition` every 5ms until it holds or `timeout` elapses.
///
/// Returns whether the condition held.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Run `fut`, panicking if it takes longer than `timeout`.
///
/// # Panics
///
/// Panics on timeout.
pub async fn within<T>(timeout: Duration, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, fut)
        .await
        .expect("operation timed out")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_wait_until_observes_change() {
        let counter = Arc::new(AtomicUsize::new(0));
        let bump = Arc::clone(&counter);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            bump.store(1, Ordering::SeqCst);
        });
        assert!(wait_until(Duration::from_secs(2), || counter.load(Ordering::SeqCst) == 1).await);
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(20), || false).await);
    }

    #[tokio::test]
    async fn test_coordinator_bus_is_running() {
        let (bus, coordinator) = test_coordinator();
        assert!(bus.is_running());
        assert!(coordinator.is_empty());
        bus.stop().await;
    }
}
