//! Aggregate bus statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind, Priority};

/// Snapshot of the bus counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusStats {
    /// Events taken off the queue and dispatched.
    pub events_processed: u64,
    /// Dispatched events per kind.
    pub by_kind: BTreeMap<EventKind, u64>,
    /// Dispatched events per priority.
    pub by_priority: BTreeMap<Priority, u64>,
    /// Cumulative dispatch time in seconds.
    pub total_processing_secs: f64,
    /// Mean dispatch time per event in seconds.
    pub average_processing_secs: f64,
    /// Receptor invocations that returned an error or panicked.
    pub receptor_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsAccumulator {
    stats: BusStats,
    total: Duration,
}

impl StatsAccumulator {
    pub(crate) fn record_received(&mut self, event: &Event) {
        let stats = &mut self.stats;
        stats.events_processed = stats.events_processed.saturating_add(1);
        let kind = stats.by_kind.entry(event.kind()).or_default();
        *kind = kind.saturating_add(1);
        let priority = stats.by_priority.entry(event.priority()).or_default();
        *priority = priority.saturating_add(1);
    }

    pub(crate) fn record_elapsed(&mut self, elapsed: Duration) {
        self.total = self.total.saturating_add(elapsed);
    }

    pub(crate) fn record_failure(&mut self) {
        self.stats.receptor_failures = self.stats.receptor_failures.saturating_add(1);
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn snapshot(&self) -> BusStats {
        let total = self.total.as_secs_f64();
        let average = if self.stats.events_processed == 0 {
            0.0
        } else {
            total / self.stats.events_processed as f64
        };
        BusStats {
            total_processing_secs: total,
            average_processing_secs: average,
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;

    #[test]
    fn test_accumulates_counts_and_average() {
        let mut acc = StatsAccumulator::default();
        acc.record_received(&Event::input("a", Payload::new()));
        acc.record_received(&Event::output("a", Payload::new()).with_priority(Priority::High));
        acc.record_elapsed(Duration::from_millis(10));
        acc.record_elapsed(Duration::from_millis(30));

        let stats = acc.snapshot();
        assert_eq!(stats.events_processed, 2);
        assert_eq!(stats.by_kind.get(&EventKind::Input), Some(&1));
        assert_eq!(stats.by_kind.get(&EventKind::Output), Some(&1));
        assert_eq!(stats.by_priority.get(&Priority::High), Some(&1));
        assert!((stats.total_processing_secs - 0.04).abs() < 1e-9);
        assert!((stats.average_processing_secs - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_empty_average_is_zero() {
        let stats = StatsAccumulator::default().snapshot();
        assert_eq!(stats.events_processed, 0);
        assert!(stats.average_processing_secs.abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_serialize_with_named_keys() {
        let mut acc = StatsAccumulator::default();
        acc.record_received(&Event::system("a", Payload::new()));
        let json = serde_json::to_value(acc.snapshot()).unwrap();
        assert_eq!(json["by_kind"]["system"], 1);
        assert_eq!(json["by_priority"]["normal"], 1);
    }
}
