//! Synapse Component - lifecycle, building blocks and coordination for
//! runtime components.
//!
//! A component implements [`Component`] and is driven through a
//! [`ComponentHandle`], which enforces the lifecycle
//! `Constructed -> Initialized -> Active <-> Inactive`, owns the component's
//! bus subscriptions and reports failures to the fault layer.
//!
//! Three building blocks cover the usual shapes:
//!
//! - [`InputComponent`] turns raw external data into events through an
//!   [`InputProcessor`]
//! - [`OutputComponent`] turns events into [`OutputAction`]s performed by an
//!   [`OutputAdapter`]
//! - [`ConnectorComponent`] bridges the bus to an external system through a
//!   reconnecting [`Link`]
//!
//! The [`Coordinator`] groups handles by kind and activates inputs, outputs
//! and connectors in that order, tearing them down in reverse.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use synapse_component::prelude::*;
//! use synapse_events::{EventBus, Payload};
//! use synapse_fault::FaultLayer;
//!
//! struct Console;
//!
//! #[async_trait]
//! impl OutputAdapter for Console {
//!     async fn perform(&self, action: &OutputAction) -> ComponentResult<()> {
//!         println!("{}", action.verb());
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> ComponentResult<()> {
//! let coordinator = Coordinator::new(EventBus::new(), Arc::new(FaultLayer::default()));
//! let handle = coordinator.handle(Box::new(OutputComponent::new("console", Console)));
//! handle.initialize(&Payload::new()).await?;
//! coordinator.register(handle)?;
//!
//! let report = coordinator.activate_all().await;
//! assert!(report.is_complete());
//! coordinator.deactivate_all().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod action;
mod component;
mod connector;
mod context;
mod coordinator;
mod error;
mod handle;
mod input;
mod output;
mod receptors;
mod stats;

pub use action::OutputAction;
pub use component::{Component, ComponentKind, LifecycleState};
pub use connector::{ConnectionState, ConnectorComponent, Link};
pub use context::{ComponentContext, Emitter};
pub use coordinator::{
    ActivationFailure, ActivationReport, Coordinator, CoordinatorStats, GroupStats,
};
pub use error::{ComponentError, ComponentResult};
pub use handle::ComponentHandle;
pub use input::{InputComponent, InputProcessor, Preprocessor};
pub use output::{OutputAdapter, OutputComponent};
pub use receptors::Receptors;
pub use stats::{ComponentSnapshot, ComponentStats};
