//! Per-component spans and the filter directives that target them.
//!
//! Every component runs its workers and receptors inside a
//! [`component_span`]. A level override for one component is an `EnvFilter`
//! directive on that span's `component` field, so raising `camera` to
//! `debug` leaves every other component at the base level.

use std::fmt;

use tracing::Span;

use crate::error::{TelemetryError, TelemetryResult};

/// Name of the span opened by [`component_span`].
pub const COMPONENT_SPAN: &str = "component";

/// Span carrying the `component` and `kind` fields of one component.
#[must_use]
pub fn component_span(component: &str, kind: impl fmt::Display) -> Span {
    tracing::info_span!("component", component = %component, kind = %kind)
}

/// Filter directive applying `level` to everything inside `component`'s span.
///
/// # Errors
///
/// Returns [`TelemetryError::ConfigError`] when the name contains characters
/// outside `[A-Za-z0-9_-]`, which the directive syntax cannot carry.
pub fn component_directive(component: &str, level: &str) -> TelemetryResult<String> {
    let valid = !component.is_empty()
        && component
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(TelemetryError::ConfigError(format!(
            "component '{component}' cannot be used in a log filter"
        )));
    }
    Ok(format!("[{COMPONENT_SPAN}{{component={component}}}]={level}"))
}
