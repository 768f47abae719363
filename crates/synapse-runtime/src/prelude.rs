//! Commonly used runtime types.
//!
//! ```rust,ignore
//! use synapse_runtime::prelude::*;
//! ```

pub use crate::{RuntimeError, RuntimeResult};

pub use crate::{Runtime, RuntimeContext, RuntimeSettings, RuntimeStats, StartReport};

pub use crate::config_bridge::{to_log_config, to_runtime_settings};
