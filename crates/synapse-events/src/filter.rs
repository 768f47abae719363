//! Receptor filters.

use std::fmt;
use std::sync::Arc;

use crate::event::{Event, EventKind, Priority};

/// Custom predicate evaluated after the structural checks of a filter.
pub type EventPredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Selects the events a receptor is interested in.
///
/// Every configured criterion must pass. Empty criteria always pass. The
/// destination patterns are only checked against events that carry a
/// destination.
#[derive(Clone, Default)]
pub struct EventFilter {
    kinds: Vec<EventKind>,
    sources: Vec<String>,
    destinations: Vec<String>,
    min_priority: Option<Priority>,
    predicate: Option<EventPredicate>,
}

impl EventFilter {
    /// Create a filter that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given kinds.
    #[must_use]
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        for kind in kinds {
            if !self.kinds.contains(&kind) {
                self.kinds.push(kind);
            }
        }
        self
    }

    /// Require the event source to contain `pattern`. Several patterns are
    /// alternatives.
    #[must_use]
    pub fn source(mut self, pattern: impl Into<String>) -> Self {
        self.sources.push(pattern.into());
        self
    }

    /// Require the event destination, when present, to contain `pattern`.
    #[must_use]
    pub fn destination(mut self, pattern: impl Into<String>) -> Self {
        self.destinations.push(pattern.into());
        self
    }

    /// Require at least this priority.
    #[must_use]
    pub fn min_priority(mut self, priority: Priority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// Add a custom predicate.
    #[must_use]
    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Kinds this filter is restricted to. Empty means any kind.
    #[must_use]
    pub fn kind_set(&self) -> &[EventKind] {
        &self.kinds
    }

    /// Evaluate the filter against an event.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind()) {
            return false;
        }

        if !self.sources.is_empty() && !self.sources.iter().any(|p| event.source().contains(p.as_str()))
        {
            return false;
        }

        if let Some(destination) = event.destination()
            && !self.destinations.is_empty()
            && !self.destinations.iter().any(|p| destination.contains(p.as_str()))
        {
            return false;
        }

        if let Some(min) = self.min_priority
            && event.priority() < min
        {
            return false;
        }

        self.predicate.as_ref().is_none_or(|predicate| predicate(event))
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("kinds", &self.kinds)
            .field("sources", &self.sources)
            .field("destinations", &self.destinations)
            .field("min_priority", &self.min_priority)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;

    fn output_high() -> Event {
        Event::output("cmd", Payload::new()).with_priority(Priority::High)
    }

    #[test]
    fn test_empty_filter_accepts_all() {
        let filter = EventFilter::new();
        for kind in EventKind::ALL {
            assert!(filter.matches(&Event::new(kind, "x", Payload::new())));
        }
    }

    #[test]
    fn test_kind_and_priority() {
        let event = output_high();
        assert!(
            EventFilter::new()
                .kinds([EventKind::Output])
                .min_priority(Priority::Normal)
                .matches(&event)
        );
        assert!(!EventFilter::new().kinds([EventKind::Input]).matches(&event));
        assert!(
            !EventFilter::new()
                .min_priority(Priority::Urgent)
                .matches(&event)
        );
    }

    #[test]
    fn test_source_substring() {
        let event = Event::input("bili_danmaku", Payload::new());
        assert!(EventFilter::new().source("danmaku").matches(&event));
        assert!(
            EventFilter::new()
                .source("nope")
                .source("bili")
                .matches(&event)
        );
        assert!(!EventFilter::new().source("console").matches(&event));
    }

    #[test]
    fn test_destination_only_checked_when_present() {
        let filter = EventFilter::new().destination("subtitle");
        assert!(filter.matches(&output_high()));
        assert!(filter.matches(&output_high().with_destination("subtitle-main")));
        assert!(!filter.matches(&output_high().with_destination("avatar")));
    }

    #[test]
    fn test_predicate() {
        let filter = EventFilter::new().predicate(|e| e.get_str("text") == Some("hi"));
        let mut payload = Payload::new();
        payload.insert("text".into(), "hi".into());
        assert!(filter.matches(&Event::input("a", payload)));
        assert!(!filter.matches(&Event::input("a", Payload::new())));
    }

    #[test]
    fn test_duplicate_kinds_collapsed() {
        let filter = EventFilter::new().kinds([EventKind::Input, EventKind::Input]);
        assert_eq!(filter.kind_set(), &[EventKind::Input]);
    }
}
