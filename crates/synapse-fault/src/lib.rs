//! Synapse Fault - fault isolation for the Synapse component runtime.
//!
//! Raw failures coming out of component operations are converted into typed
//! [`Incident`]s and fed to a [`FaultLayer`], which:
//!
//! - keeps a bounded history of recent incidents
//! - tracks a health score and failure counter per component
//! - notifies handlers registered for the incident kind, then wildcard handlers
//! - applies the component's [`RecoveryPolicy`] (retry, degrade or isolate)
//!
//! The retry loop itself lives in [`FaultLayer::guard`], a wrapper around any
//! fallible async operation. [`HealthMonitor`] runs periodic health checks
//! on top of the layer.
//!
//! # Example
//!
//! ```rust
//! use synapse_fault::{FaultLayer, IncidentKind, RecoveryPolicy};
//!
//! # async fn example() {
//! let fault = FaultLayer::default();
//! fault.set_policy("chat", RecoveryPolicy::isolate(3));
//!
//! let result = fault
//!     .guard("chat", IncidentKind::Network, || async {
//!         Err::<(), _>(std::io::Error::other("connection reset"))
//!     })
//!     .await;
//!
//! assert!(result.is_err());
//! assert!(fault.health("chat") < 1.0);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod guard;
mod incident;
mod layer;
mod monitor;
mod panic_hook;
mod policy;

pub use error::{FaultError, FaultResult};
pub use guard::GuardOptions;
pub use incident::{Incident, IncidentKind, IncidentRecord};
pub use layer::{
    ComponentHealth, FaultLayer, FaultSettings, FaultStats, HandlerResult, HandlerScope,
    IncidentHandler,
};
pub use monitor::{
    CheckReport, HealthCheck, HealthMonitor, HealthStatus, MIN_TICK, StatusListener,
    component_health_check,
};
pub use panic_hook::install_panic_hook;
pub use policy::{Fallback, RecoveryPolicy, RetrySettings};
