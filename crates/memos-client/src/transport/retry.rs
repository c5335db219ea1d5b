//! Exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;
use reqwest::Method;

use crate::config::ClientConfig;
use crate::Error;

/// Whether a request may be retried on transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMode {
    /// Retry idempotent methods only (GET, HEAD, PUT, DELETE).
    #[default]
    Default,
    /// Retry regardless of method. Callers opt in for POST/PATCH they know
    /// to be safe to repeat.
    Always,
    Never,
}

impl RetryMode {
    #[must_use]
    pub fn allows(self, method: &Method) -> bool {
        match self {
            Self::Default => is_idempotent(method),
            Self::Always => true,
            Self::Never => false,
        }
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, base: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base,
            multiplier,
            max_delay,
        }
    }

    #[must_use]
    pub const fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.backoff_base,
            config.backoff_multiplier,
            config.backoff_max,
        )
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound of the sleep after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(scaled).map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Random sleep in `[0, ceiling(attempt)]`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }

    /// Whether attempt `attempt` (1-based) failing with `error` should be retried.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &Error) -> bool {
        attempt < self.max_attempts && error.is_transient()
    }
}
