//! Recovery policies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::incident::Incident;

/// Callable invoked by a degrade policy in place of failing further.
pub type Fallback = Arc<dyn Fn(&Incident) + Send + Sync>;

/// Retry tuning used by the guard wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the initial attempt (0 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub delay: Duration,
    /// Multiplier applied to the delay after every retry.
    pub backoff: f64,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl RetrySettings {
    /// Retry settings with the given attempts, delay and backoff.
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration, backoff: f64) -> Self {
        Self {
            max_attempts,
            delay,
            backoff,
            max_delay: Duration::from_secs(30),
        }
    }

    /// No retries at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
            backoff: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Cap a single delay.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Whether another retry is allowed after `attempt` (0-indexed) failed.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-indexed). Zero for attempt 0.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.delay.as_millis() as f64 * self.backoff.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0)
    }
}

/// Per-component recovery policy.
#[derive(Clone)]
pub enum RecoveryPolicy {
    /// Retry the failing operation with exponential backoff. The retry loop is
    /// run by [`FaultLayer::guard`](crate::FaultLayer::guard).
    Retry(RetrySettings),
    /// Once the failure counter reaches `threshold`, call `fallback` for every
    /// further failure.
    Degrade {
        /// Failures before the fallback takes over.
        threshold: u32,
        /// Replacement behavior.
        fallback: Fallback,
    },
    /// Once the failure counter reaches `threshold`, quarantine the component.
    Isolate {
        /// Failures before quarantine.
        threshold: u32,
    },
}

impl RecoveryPolicy {
    /// Retry policy with default delay (1 s) and backoff (2.0).
    #[must_use]
    pub fn retry(max_attempts: u32) -> Self {
        Self::Retry(RetrySettings {
            max_attempts,
            ..RetrySettings::default()
        })
    }

    /// Degrade policy.
    pub fn degrade<F>(threshold: u32, fallback: F) -> Self
    where
        F: Fn(&Incident) + Send + Sync + 'static,
    {
        Self::Degrade {
            threshold,
            fallback: Arc::new(fallback),
        }
    }

    /// Isolate policy.
    #[must_use]
    pub fn isolate(threshold: u32) -> Self {
        Self::Isolate { threshold }
    }

    /// Short policy name used in logs and stats.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Retry(_) => "retry",
            Self::Degrade { .. } => "degrade",
            Self::Isolate { .. } => "isolate",
        }
    }
}

impl fmt::Debug for RecoveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry(settings) => f.debug_tuple("Retry").field(settings).finish(),
            Self::Degrade { threshold, .. } => f
                .debug_struct("Degrade")
                .field("threshold", threshold)
                .finish_non_exhaustive(),
            Self::Isolate { threshold } => f
                .debug_struct("Isolate")
                .field("threshold", threshold)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let settings = RetrySettings::new(5, Duration::from_millis(100), 2.0);
        assert_eq!(settings.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(settings.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(settings.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(settings.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped() {
        let settings = RetrySettings::new(10, Duration::from_millis(100), 2.0)
            .with_max_delay(Duration::from_millis(250));
        assert_eq!(settings.delay_for_attempt(5), Duration::from_millis(250));
    }

    #[test]
    fn test_should_retry() {
        let settings = RetrySettings::new(3, Duration::ZERO, 2.0);
        assert!(settings.should_retry(0));
        assert!(settings.should_retry(2));
        assert!(!settings.should_retry(3));
        assert!(!RetrySettings::none().should_retry(0));
    }

    #[test]
    fn test_defaults() {
        let settings = RetrySettings::default();
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.delay, Duration::from_secs(1));
        assert!((settings.backoff - 2.0).abs() < f64::EPSILON);
        assert_eq!(RecoveryPolicy::retry(5).name(), "retry");
        assert_eq!(RecoveryPolicy::isolate(2).name(), "isolate");
        assert_eq!(RecoveryPolicy::degrade(2, |_| {}).name(), "degrade");
    }
}
