//! Retry policy and the per-request audit trail.

use crate::config::duration_ms;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with additive jitter.
///
/// The delay before retry `n` (0-based) is
/// `min(base_delay * 2^n, max_delay) + uniform[0, max_jitter)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets base, cap and jitter bound in one go.
    #[must_use]
    pub fn with_delays(mut self, base: Duration, max: Duration, jitter: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self.max_jitter = jitter;
        self
    }

    /// Backoff before retry `attempt` without jitter. Non-decreasing in
    /// `attempt` and never above `max_delay`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff before retry `attempt`, jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay_for(attempt) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..self.max_jitter.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// One failed attempt that was followed by a retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    /// 0-based retry index.
    pub attempt: u32,
    /// Delay slept before the retry, jitter included.
    pub delay_ms: f64,
    pub timestamp: DateTime<Utc>,
    /// Why the attempt failed.
    pub error: String,
}
