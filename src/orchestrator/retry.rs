//! Exponential backoff with jitter for retriable scrape failures.

use std::time::Duration;

use rand::Rng;

use crate::config::{RetryConfig, duration};

/// Retry schedule: `initial_delay * multiplier^(attempt - 1)`, capped at
/// `max_delay`, then spread by ±`jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random; 0 disables jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(retry: Option<&RetryConfig>) -> Self {
        let defaults = Self::default();
        let Some(retry) = retry else {
            return defaults;
        };

        Self {
            max_attempts: retry.max_attempts.unwrap_or(defaults.max_attempts),
            initial_delay: duration::or_default(retry.initial_delay, defaults.initial_delay),
            max_delay: duration::or_default(retry.max_delay, defaults.max_delay),
            multiplier: retry.multiplier.unwrap_or(defaults.multiplier),
            jitter: defaults.jitter,
        }
    }

    /// Returns true if a job that just finished `attempt` may run again.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the retry that follows `attempt`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Delay before the retry that follows `attempt`, with jitter applied and
    /// never shorter than what the server asked for.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.base_delay(attempt);
        let jittered = if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            base.mul_f64((1.0 + factor).max(0.0)).min(self.max_delay)
        } else {
            base
        };

        match retry_after {
            Some(wait) if wait > jittered => wait,
            _ => jittered,
        }
    }
}
