//! Retry policy for contended stock writes.

use std::time::Duration;

use rand::Rng;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Same delay every attempt.
    Fixed,
    /// Delay doubles each attempt, capped at `max_delay`.
    #[default]
    Exponential,
    /// Delay grows by `base_delay` each attempt.
    Linear,
}

/// How many times a retryable failure (lock timeout, serialization failure)
/// is re-attempted, and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0 - 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay before the attempt following `attempt` (1-indexed).
    ///
    /// With a non-zero `jitter` the result is drawn uniformly from
    /// `backoff * (1 ± jitter)`, so reservers contending for the same item
    /// wake at different times.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let spread = self.jitter.clamp(0.0, 1.0);
        if backoff.is_zero() || spread == 0.0 {
            return backoff;
        }
        let factor = rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
        backoff.mul_f64(factor)
    }

    /// Un-jittered delay for `attempt`, capped at `max_delay`.
    fn backoff(&self, attempt: u32) -> Duration {
        let Some(steps) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => self
                .base_delay
                .saturating_mul(2_u32.checked_pow(steps).unwrap_or(u32::MAX)),
        };
        raw.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` attempts have failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
