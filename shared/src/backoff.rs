//! Exponential retry backoff
//!
//! The delay for attempt `n` (1-based) is `base × 2^(n-1)`, clamped to `max`
//! when a cap is configured. Each delay is derived from the attempt number
//! alone, so no previous delay feeds into the next one.

use std::time::Duration;

/// Retry backoff policy shared by service restarts and update retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Optional cap on any single delay
    pub max: Option<Duration>,
}

impl BackoffPolicy {
    /// Uncapped doubling from `base`
    pub fn exponential(base: Duration) -> Self {
        Self { base, max: None }
    }

    /// Doubling from `base`, never longer than `max`
    pub fn capped(base: Duration, max: Duration) -> Self {
        Self { base, max: Some(max) }
    }

    /// Delay before retry number `attempt` (1-based; 0 is treated as 1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(Duration::MAX);
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
