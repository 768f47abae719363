//! Event bus: receptor tables and the FIFO dispatch worker.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Instant;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::event::{Event, EventKind};
use crate::receptor::{Callback, Receptor, ReceptorResult, SubscriptionId};
use crate::stats::{BusStats, StatsAccumulator};

/// Receptor storage. Global receptors are checked for every event, indexed
/// receptors only for the kinds their filter names.
#[derive(Default)]
struct ReceptorTable {
    global: Vec<Arc<Receptor>>,
    by_kind: HashMap<EventKind, Vec<Arc<Receptor>>>,
    index: HashMap<SubscriptionId, Arc<Receptor>>,
}

impl ReceptorTable {
    fn insert(&mut self, receptor: Arc<Receptor>) {
        let kinds = indexed_kinds(&receptor);
        if kinds.is_empty() {
            self.global.push(Arc::clone(&receptor));
        } else {
            for kind in kinds {
                self.by_kind
                    .entry(kind)
                    .or_default()
                    .push(Arc::clone(&receptor));
            }
        }
        self.index.insert(receptor.id, receptor);
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(receptor) = self.index.remove(&id) else {
            return false;
        };
        let kinds = indexed_kinds(&receptor);
        if kinds.is_empty() {
            self.global.retain(|r| r.id != id);
        } else {
            for kind in kinds {
                if let Some(list) = self.by_kind.get_mut(&kind) {
                    list.retain(|r| r.id != id);
                    if list.is_empty() {
                        self.by_kind.remove(&kind);
                    }
                }
            }
        }
        true
    }

    /// Global receptors plus those indexed under the event's kind, in
    /// registration order.
    fn candidates(&self, kind: EventKind) -> Vec<Arc<Receptor>> {
        let mut out: Vec<Arc<Receptor>> = self.global.clone();
        if let Some(list) = self.by_kind.get(&kind) {
            out.extend(list.iter().cloned());
        }
        out.sort_by_key(|r| r.sequence);
        out
    }
}

fn indexed_kinds(receptor: &Receptor) -> Vec<EventKind> {
    receptor
        .filter
        .as_ref()
        .map(|f| f.kind_set().to_vec())
        .unwrap_or_default()
}

struct Worker {
    sender: mpsc::UnboundedSender<Arc<Event>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct BusInner {
    receptors: RwLock<ReceptorTable>,
    stats: Mutex<StatsAccumulator>,
    worker: Mutex<Option<Worker>>,
    sequence: AtomicU64,
    queued: AtomicUsize,
    queue_warn_depth: usize,
}

/// Typed publish/subscribe bus.
///
/// `EventBus` is a cheap handle; clones share the same receptor tables,
/// queue and statistics. The dispatch worker only holds a weak reference,
/// so dropping every handle also ends the worker.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a stopped bus with no receptors.
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_warn_depth(0)
    }

    /// Create a stopped bus that logs a warning each time the queue grows to
    /// `depth` pending events. Zero disables the warning.
    #[must_use]
    pub fn with_queue_warn_depth(depth: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                receptors: RwLock::new(ReceptorTable::default()),
                stats: Mutex::new(StatsAccumulator::default()),
                worker: Mutex::new(None),
                sequence: AtomicU64::new(0),
                queued: AtomicUsize::new(0),
                queue_warn_depth: depth,
            }),
        }
    }

    /// Start the dispatch worker.
    ///
    /// Must be called from within a Tokio runtime. Starting a running bus
    /// is a no-op.
    pub fn start(&self) {
        let mut slot = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("Event bus already running");
            return;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_worker(
            Arc::downgrade(&self.inner),
            receiver,
            cancel.clone(),
        ));
        *slot = Some(Worker {
            sender,
            cancel,
            handle,
        });
        info!("Event bus started");
    }

    /// Stop the dispatch worker and wait for it to exit.
    ///
    /// Events still queued are dropped.
    pub async fn stop(&self) {
        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Worker {
            sender,
            cancel,
            handle,
        }) = worker
        else {
            debug!("Event bus already stopped");
            return;
        };

        cancel.cancel();
        drop(sender);
        if let Err(e) = handle.await
            && e.is_panic()
        {
            warn!(error = %e, "Event bus worker panicked");
        }

        let dropped = self.inner.queued.swap(0, Ordering::AcqRel);
        if dropped > 0 {
            debug!(dropped, "Dropped queued events on stop");
        }
        info!("Event bus stopped");
    }

    /// Whether the dispatch worker is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Enqueue an event for dispatch.
    ///
    /// Never waits for receptors. Returns `false` (and logs) when the bus is
    /// not running.
    pub fn publish(&self, event: Event) -> bool {
        let slot = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(worker) = slot.as_ref() else {
            warn!(
                event_id = %event.id(),
                kind = %event.kind(),
                source = %event.source(),
                "Event bus not running, dropping event"
            );
            return false;
        };

        trace!(event_id = %event.id(), kind = %event.kind(), "Publishing event");
        let depth = self.inner.queued.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if self.inner.queue_warn_depth > 0 && depth == self.inner.queue_warn_depth {
            warn!(depth, "Event bus queue is backing up");
        }
        if worker.sender.send(Arc::new(event)).is_err() {
            self.inner.queued.fetch_sub(1, Ordering::AcqRel);
            warn!("Event bus worker gone, dropping event");
            return false;
        }
        true
    }

    /// Dispatch an event on the calling task, bypassing the queue.
    ///
    /// Filtering, isolation and statistics are identical to queued dispatch.
    pub async fn publish_now(&self, event: Event) {
        self.inner.dispatch(Arc::new(event)).await;
    }

    /// Register a receptor and return its id.
    pub fn subscribe(&self, mut receptor: Receptor) -> SubscriptionId {
        receptor.sequence = self.inner.sequence.fetch_add(1, Ordering::AcqRel);
        let id = receptor.id;
        debug!(
            subscription_id = %id,
            receptor = %receptor.name(),
            owner = receptor.owner().unwrap_or("-"),
            is_async = receptor.is_async(),
            "Receptor registered"
        );
        self.inner
            .receptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Arc::new(receptor));
        id
    }

    /// Remove a receptor. Returns whether anything was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self
            .inner
            .receptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed {
            debug!(subscription_id = %id, "Receptor unregistered");
        }
        removed
    }

    /// Number of registered receptors.
    #[must_use]
    pub fn receptor_count(&self) -> usize {
        self.inner
            .receptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .len()
    }

    /// Number of events waiting for dispatch.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.queued.load(Ordering::Acquire)
    }

    /// Snapshot of the dispatch statistics.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        self.inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Reset the dispatch statistics.
    pub fn reset_stats(&self) {
        *self
            .inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = StatsAccumulator::default();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("running", &self.is_running())
            .field("receptors", &self.receptor_count())
            .field("queued", &self.queue_len())
            .finish()
    }
}

async fn run_worker(
    inner: Weak<BusInner>,
    mut receiver: mpsc::UnboundedReceiver<Arc<Event>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Some(event) => event,
                None => break,
            },
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.queued.fetch_sub(1, Ordering::AcqRel);

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = inner.dispatch(event) => {},
        }
    }
    debug!("Event bus worker exited");
}

impl BusInner {
    async fn dispatch(&self, event: Arc<Event>) {
        let started = Instant::now();
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_received(&event);

        let candidates = self
            .receptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .candidates(event.kind());

        let mut pending = Vec::new();
        for receptor in candidates.into_iter().filter(|r| r.accepts(&event)) {
            match &receptor.callback {
                Callback::Sync(callback) => {
                    let result =
                        std::panic::catch_unwind(AssertUnwindSafe(|| callback(event.as_ref())));
                    self.settle(&receptor, &event, result);
                },
                Callback::Async(callback) => {
                    let future = AssertUnwindSafe(callback(Arc::clone(&event))).catch_unwind();
                    pending.push(async move { (receptor, future.await) });
                },
            }
        }

        for (receptor, result) in join_all(pending).await {
            self.settle(&receptor, &event, result);
        }

        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_elapsed(started.elapsed());
        trace!(event_id = %event.id(), elapsed = ?started.elapsed(), "Event dispatched");
    }

    fn settle(
        &self,
        receptor: &Receptor,
        event: &Event,
        result: std::thread::Result<ReceptorResult>,
    ) {
        let failure = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_failure();
        warn!(
            subscription_id = %receptor.id,
            receptor = %receptor.name(),
            owner = receptor.owner().unwrap_or("-"),
            event_id = %event.id(),
            error = %failure,
            "Receptor failed"
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}
