//! Synapse Events - typed publish/subscribe bus for the Synapse runtime.
//!
//! This crate provides:
//! - The [`Event`] record carried between components
//! - [`EventFilter`] for selecting events by kind, origin, destination,
//!   priority and an arbitrary predicate
//! - The [`EventBus`], a single FIFO dispatch worker feeding synchronous and
//!   asynchronous [`Receptor`]s
//!
//! # Architecture
//!
//! Producers call [`EventBus::publish`], which only enqueues. One worker task
//! drains the queue and, for each event, builds the candidate set from the
//! global receptors plus the receptors indexed under the event's kind. Every
//! candidate whose filter matches is invoked exactly once: synchronous
//! receptors first, in registration order, then all asynchronous receptors
//! concurrently. A failing or panicking receptor is logged and never aborts
//! dispatch to the others.
//!
//! # Example
//!
//! ```rust
//! use synapse_events::{Event, EventBus, EventFilter, EventKind, Payload, Priority, Receptor};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! bus.start();
//!
//! bus.subscribe(
//!     Receptor::asynchronous(|event| async move {
//!         println!("output event from {}", event.source());
//!         Ok::<(), synapse_events::ReceptorError>(())
//!     })
//!     .with_filter(
//!         EventFilter::new()
//!             .kinds([EventKind::Output])
//!             .min_priority(Priority::Normal),
//!     ),
//! );
//!
//! bus.publish(Event::output("cmd", Payload::new()).with_priority(Priority::High));
//! bus.stop().await;
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod error;
mod event;
mod filter;
mod receptor;
mod stats;

pub use bus::EventBus;
pub use error::{EventError, EventResult};
pub use event::{AvatarCue, Event, EventKind, EventRecord, Payload, Priority, ProcessingRecord};
pub use filter::{EventFilter, EventPredicate};
pub use receptor::{Receptor, ReceptorError, ReceptorResult, SubscriptionId};
pub use stats::BusStats;
