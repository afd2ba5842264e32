//! Retry backoff calculation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay used when a job carries no backoff configuration.
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

/// Cap applied to exponential and linear backoff when `maxDelay` is unset.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// `delay * 2^(attempts - 1)`, capped.
    Exponential,
    /// Constant delay.
    Fixed,
    /// `delay * attempts`, capped.
    Linear,
}

/// Backoff configuration attached to a job's options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffOptions {
    /// Strategy.
    #[serde(rename = "type")]
    pub kind: BackoffKind,

    /// Base delay in milliseconds.
    pub delay: u64,

    /// Upper bound in milliseconds (defaults to 30s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<u64>,
}

impl BackoffOptions {
    /// Creates an exponential backoff.
    pub fn exponential(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay: delay_ms,
            max_delay: None,
        }
    }

    /// Creates a fixed backoff.
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay: delay_ms,
            max_delay: None,
        }
    }

    /// Creates a linear backoff.
    pub fn linear(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Linear,
            delay: delay_ms,
            max_delay: None,
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Returns the effective cap.
    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay.unwrap_or(DEFAULT_MAX_DELAY_MS)
    }
}

/// Calculate the retry delay in milliseconds.
///
/// `attempts` is the attempt count after the failed attempt, so the first
/// retry is computed with `attempts == 1`.
pub fn backoff_delay_ms(attempts: u32, backoff: Option<&BackoffOptions>) -> u64 {
    let Some(backoff) = backoff else {
        return DEFAULT_BACKOFF_MS;
    };

    match backoff.kind {
        BackoffKind::Fixed => backoff.delay,
        BackoffKind::Exponential => {
            let exp = attempts.saturating_sub(1).min(63);
            backoff
                .delay
                .saturating_mul(1u64 << exp)
                .min(backoff.max_delay_ms())
        }
        BackoffKind::Linear => backoff
            .delay
            .saturating_mul(u64::from(attempts))
            .min(backoff.max_delay_ms()),
    }
}

/// Calculate the retry delay as a `Duration`.
pub fn backoff_delay(attempts: u32, backoff: Option<&BackoffOptions>) -> Duration {
    Duration::from_millis(backoff_delay_ms(attempts, backoff))
}
