//! Retry and heal wrapper for component operations.

use std::error::Error as StdError;
use std::future::Future;

use tracing::{debug, warn};

use crate::incident::{Incident, IncidentKind};
use crate::layer::FaultLayer;
use crate::policy::RetrySettings;

/// How a guarded operation is classified and retried.
#[derive(Debug, Clone)]
pub struct GuardOptions {
    component: String,
    kind: IncidentKind,
    recovery_hint: Option<String>,
    retry: Option<RetrySettings>,
}

impl GuardOptions {
    /// Guard operations of `component`, classifying unknown failures as `kind`.
    #[must_use]
    pub fn new(component: impl Into<String>, kind: IncidentKind) -> Self {
        Self {
            component: component.into(),
            kind,
            recovery_hint: None,
            retry: None,
        }
    }

    /// Hint attached to incidents produced from untyped failures.
    #[must_use]
    pub fn with_recovery_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hint = Some(hint.into());
        self
    }

    /// Override the component's retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = Some(retry);
        self
    }

    fn classify(&self, error: Box<dyn StdError + Send + Sync>) -> Incident {
        match error.downcast::<Incident>() {
            Ok(incident) => {
                let mut incident = *incident;
                incident.set_component_if_missing(&self.component);
                incident
            },
            Err(other) => {
                let mut incident = Incident::new(self.kind, other.to_string())
                    .with_component(self.component.clone())
                    .with_boxed_cause(other);
                if let Some(hint) = &self.recovery_hint {
                    incident = incident.with_recovery_hint(hint.clone());
                }
                incident
            },
        }
    }
}

impl FaultLayer {
    /// Run `operation` under the component's recovery policy.
    ///
    /// See [`guard_with`](Self::guard_with).
    ///
    /// # Errors
    ///
    /// Returns the incident produced by the last failed attempt.
    pub async fn guard<T, E, F, Fut>(
        &self,
        component: &str,
        kind: IncidentKind,
        operation: F,
    ) -> Result<T, Incident>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.guard_with(GuardOptions::new(component, kind), operation)
            .await
    }

    /// Run `operation`, healing the component slightly on success.
    ///
    /// A failure that already is an [`Incident`] keeps its classification;
    /// anything else is wrapped into an incident of the configured kind.
    /// Every failure is handled by the layer, then the operation is retried
    /// with backoff up to the component's retry bound (no retries without a
    /// retry policy). Retrying stops early once the component is quarantined.
    ///
    /// # Errors
    ///
    /// Returns the incident produced by the last failed attempt.
    pub async fn guard_with<T, E, F, Fut>(
        &self,
        options: GuardOptions,
        mut operation: F,
    ) -> Result<T, Incident>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let retry = options
            .retry
            .clone()
            .or_else(|| self.retry_settings(&options.component))
            .unwrap_or_else(RetrySettings::none);
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    self.heal(&options.component, self.settings().success_heal);
                    return Ok(value);
                },
                Err(error) => {
                    let incident = options.classify(error.into());
                    self.handle(&incident);

                    if self.is_quarantined(&options.component) {
                        debug!(component = %options.component, "Not retrying quarantined component");
                        return Err(incident);
                    }
                    if !retry.should_retry(attempt) {
                        if attempt > 0 {
                            warn!(
                                component = %options.component,
                                attempts = attempt.saturating_add(1),
                                "Operation failed after retries"
                            );
                        }
                        return Err(incident);
                    }

                    attempt = attempt.saturating_add(1);
                    let delay = retry.delay_for_attempt(attempt);
                    debug!(
                        component = %options.component,
                        attempt,
                        max_attempts = retry.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Retrying operation"
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }
}
