// ABOUTME: Reconnect policy for the stream consumer: bounded attempts with clamped exponential waits.
// ABOUTME: Waits double from the minimum and never exceed the maximum.

use std::time::Duration;

/// Retry policy for re-subscribing after a failed or broken stream.
///
/// The wait after failed attempt `n` (1-based) is
/// `multiplier * 2^(n-1)` seconds, clamped to `[min_delay, max_delay]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub multiplier: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            multiplier: 1.0,
            min_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// How long to wait after failed attempt `attempt` (1-based) before
    /// the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.multiplier * 2f64.powi(exponent);
        let delay = if secs.is_finite() && secs >= 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
        } else {
            self.max_delay
        };
        delay.clamp(self.min_delay, self.max_delay)
    }

    /// Whether another attempt may follow failed attempt `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
