//! Prelude module - commonly used types for convenient import.
//!
//! Use `use synapse_events::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use synapse_events::prelude::*;
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let id = bus.subscribe(
//!     Receptor::sync(|event| {
//!         println!("got {}", event.kind());
//!         Ok(())
//!     })
//!     .with_filter(EventFilter::new().kinds([EventKind::Output])),
//! );
//!
//! bus.publish_now(Event::output("cmd", Payload::new())).await;
//! assert!(bus.unsubscribe(id));
//! # }
//! ```

// Event bus
pub use crate::{BusStats, EventBus};

// Events
pub use crate::{Event, EventKind, Payload, Priority, ProcessingRecord};

// Receptors
pub use crate::{EventFilter, Receptor, ReceptorError, ReceptorResult, SubscriptionId};
