//! Receptors: callbacks registered on the bus.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;
use crate::filter::EventFilter;

/// Error returned by a failing receptor.
pub type ReceptorError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by receptor callbacks.
pub type ReceptorResult = Result<(), ReceptorError>;

pub(crate) type SyncCallback = Arc<dyn Fn(&Event) -> ReceptorResult + Send + Sync>;
pub(crate) type AsyncCallback =
    Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, ReceptorResult> + Send + Sync>;

/// Registration handle for a receptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone)]
pub(crate) enum Callback {
    Sync(SyncCallback),
    Async(AsyncCallback),
}

/// A callback plus the filter deciding which events reach it.
///
/// A receptor without a filter, or whose filter names no kinds, is global and
/// is considered for every event. Otherwise the bus indexes it under each
/// kind it names.
#[derive(Clone)]
pub struct Receptor {
    pub(crate) id: SubscriptionId,
    pub(crate) name: Option<String>,
    pub(crate) owner: Option<String>,
    pub(crate) filter: Option<EventFilter>,
    pub(crate) callback: Callback,
    pub(crate) registered_at: DateTime<Utc>,
    pub(crate) sequence: u64,
}

impl Receptor {
    fn with_callback(callback: Callback) -> Self {
        Self {
            id: SubscriptionId::new(),
            name: None,
            owner: None,
            filter: None,
            callback,
            registered_at: Utc::now(),
            sequence: 0,
        }
    }

    /// A receptor invoked on the dispatch worker, in registration order.
    pub fn sync<F>(callback: F) -> Self
    where
        F: Fn(&Event) -> ReceptorResult + Send + Sync + 'static,
    {
        Self::with_callback(Callback::Sync(Arc::new(callback)))
    }

    /// A receptor whose future runs concurrently with the other asynchronous
    /// receptors matching the same event.
    pub fn asynchronous<F, Fut>(callback: F) -> Self
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReceptorResult> + Send + 'static,
    {
        Self::with_callback(Callback::Async(Arc::new(move |event| {
            Box::pin(callback(event))
        })))
    }

    /// Attach a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Name used in log output.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name of the component owning this receptor.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// The id this receptor will be registered under.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }

    /// Owning component, if any.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Whether the callback is asynchronous.
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self.callback, Callback::Async(_))
    }

    /// When the receptor was created.
    #[must_use]
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub(crate) fn accepts(&self, event: &Event) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter.matches(event))
    }
}

impl fmt::Debug for Receptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receptor")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("owner", &self.owner)
            .field("async", &self.is_async())
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
