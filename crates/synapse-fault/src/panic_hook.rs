//! Process-wide panic reporting.

use std::sync::Arc;

use crate::incident::{Incident, IncidentKind};
use crate::layer::FaultLayer;

/// Record every panic as a system incident, then run the previous hook.
///
/// Panics caught inside receptors are still reported here, since the hook
/// runs before unwinding starts.
pub fn install_panic_hook(fault: Arc<FaultLayer>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let mut incident = Incident::new(IncidentKind::System, format!("panic: {message}"));
        if let Some(location) = info.location() {
            incident = incident.with_recovery_hint(format!(
                "panicked at {}:{}",
                location.file(),
                location.line()
            ));
        }
        fault.handle(&incident);
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_recorded_as_incident() {
        let fault = Arc::new(FaultLayer::default());
        install_panic_hook(Arc::clone(&fault));

        let joined = std::thread::spawn(|| panic!("hook test marker")).join();
        assert!(joined.is_err());

        let found = fault.recent_incidents().into_iter().any(|incident| {
            incident.kind() == IncidentKind::System
                && incident.message().contains("hook test marker")
                && incident
                    .recovery_hint()
                    .is_some_and(|hint| hint.contains("panic_hook.rs"))
        });
        assert!(found);
    }
}
