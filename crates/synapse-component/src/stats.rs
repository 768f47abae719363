//! Per-component statistics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::component::{ComponentKind, LifecycleState};

/// Live counters shared between a component handle, its receptors and its
/// background tasks.
#[derive(Debug, Default)]
pub struct ComponentStats {
    processed: AtomicU64,
    transmitted: AtomicU64,
    errors: AtomicU64,
    last_active: Mutex<Option<DateTime<Utc>>>,
    counters: Mutex<BTreeMap<&'static str, u64>>,
}

impl ComponentStats {
    /// Count a handled event and mark the component as recently active.
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// Count a published event.
    pub fn record_transmitted(&self) {
        self.transmitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failure.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the last-active time.
    pub fn touch(&self) {
        *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    /// Increment a named, component specific counter.
    pub fn bump(&self, counter: &'static str) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let value = counters.entry(counter).or_insert(0);
        *value = value.saturating_add(1);
    }

    /// Events handled.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Events published.
    #[must_use]
    pub fn transmitted(&self) -> u64 {
        self.transmitted.load(Ordering::Relaxed)
    }

    /// Failures.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Value of a named counter.
    #[must_use]
    pub fn counter(&self, counter: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(counter)
            .copied()
            .unwrap_or(0)
    }

    /// Last time the component handled something.
    #[must_use]
    pub fn last_active(&self) -> Option<DateTime<Utc>> {
        *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(
        &self,
        name: &str,
        kind: ComponentKind,
        state: LifecycleState,
        subscriptions: usize,
    ) -> ComponentSnapshot {
        ComponentSnapshot {
            name: name.to_string(),
            kind,
            state,
            subscriptions,
            events_processed: self.processed(),
            events_transmitted: self.transmitted(),
            errors: self.errors(),
            last_active: self.last_active(),
            counters: self
                .counters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
        }
    }
}

/// Serializable view of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    /// Component name.
    pub name: String,
    /// Category.
    pub kind: ComponentKind,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Owned subscriptions.
    pub subscriptions: usize,
    /// Events handled.
    pub events_processed: u64,
    /// Events published.
    pub events_transmitted: u64,
    /// Failures.
    pub errors: u64,
    /// Last time the component handled something.
    pub last_active: Option<DateTime<Utc>>,
    /// Component specific counters.
    pub counters: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = ComponentStats::default();
        assert!(stats.last_active().is_none());

        stats.record_processed();
        stats.record_processed();
        stats.record_transmitted();
        stats.record_error();
        stats.bump("reconnect_attempts");
        stats.bump("reconnect_attempts");

        let snapshot = stats.snapshot("chat", ComponentKind::Connector, LifecycleState::Active, 1);
        assert_eq!(snapshot.events_processed, 2);
        assert_eq!(snapshot.events_transmitted, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.counters.get("reconnect_attempts"), Some(&2));
        assert!(snapshot.last_active.is_some());
        assert_eq!(stats.counter("missing"), 0);
    }
}
