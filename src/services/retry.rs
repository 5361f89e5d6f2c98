// services/retry.rs
use std::time::Duration;

/// Bounded exponential backoff: `retries` extra attempts after the first,
/// waiting `base_delay * 2^n` before retry `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        RetryPolicy { retries, base_delay }
    }

    /// Delay before the retry following failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}
