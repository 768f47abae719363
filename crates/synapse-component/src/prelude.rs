//! Prelude module - commonly used types for convenient import.
//!
//! Use `use synapse_component::prelude::*;` when writing components.

// Lifecycle
pub use crate::{Component, ComponentHandle, ComponentKind, LifecycleState};

// Activation
pub use crate::{ComponentContext, Emitter, Receptors};

// Building blocks
pub use crate::{
    ConnectionState, ConnectorComponent, InputComponent, InputProcessor, Link, OutputAction,
    OutputAdapter, OutputComponent,
};

// Coordination
pub use crate::{ActivationReport, Coordinator};

// Errors
pub use crate::{ComponentError, ComponentResult};
