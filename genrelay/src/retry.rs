//! Retry decisions with exponential backoff and jitter.
//!
//! [`RetryPolicy::decide`] is a pure function of the attempt count and the
//! failure classification. The only non-determinism is the jitter, which can
//! be disabled for tests.
//!
//! ```text
//! delay = min(base * 2^(attempt-1), max_delay)
//! delay = min(delay + uniform[0, delay), max_delay)
//! ```

use crate::error::FailureClassification;
use rand::Rng;
use std::time::Duration;

/// Default total attempts (first call included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base backoff delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 200;

/// Default backoff cap in seconds.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 10;

/// Default minimum delay after a throttling response, in milliseconds.
pub const DEFAULT_RATE_LIMIT_FLOOR_MS: u64 = 500;

/// Default largest retry-after hint that is still honored, in seconds.
pub const DEFAULT_MAX_RETRY_AFTER_SECS: u64 = 60;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts allowed, first call included.
    pub max_attempts: u32,
    /// Backoff delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound of any backoff delay.
    pub max_delay: Duration,
    /// Minimum delay after a throttling response.
    pub rate_limit_floor: Duration,
    /// Retry-after hints above this give up instead of waiting.
    pub max_retry_after: Duration,
    /// Whether random jitter is added to backoff delays.
    pub jitter: bool,
}

impl RetryConfig {
    /// Sets the total attempt budget (at least 1).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base backoff delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the throttling floor delay.
    pub fn with_rate_limit_floor(mut self, delay: Duration) -> Self {
        self.rate_limit_floor = delay;
        self
    }

    /// Sets the largest honored retry-after hint.
    pub fn with_max_retry_after(mut self, delay: Duration) -> Self {
        self.max_retry_after = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            rate_limit_floor: Duration::from_millis(DEFAULT_RATE_LIMIT_FLOOR_MS),
            max_retry_after: Duration::from_secs(DEFAULT_MAX_RETRY_AFTER_SECS),
            jitter: true,
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-submit the task after the delay.
    Retry(Duration),
    /// Complete the task with a terminal failure.
    GiveUp,
}

impl RetryDecision {
    /// Returns the delay for a retry decision.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Retry(delay) => Some(*delay),
            Self::GiveUp => None,
        }
    }
}

/// Stateless retry policy.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy from configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns the total attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decides whether to retry after `attempt` attempts have failed.
    pub fn decide(&self, attempt: u32, classification: &FailureClassification) -> RetryDecision {
        if attempt >= self.config.max_attempts {
            return RetryDecision::GiveUp;
        }

        match classification {
            FailureClassification::Fatal(_) => RetryDecision::GiveUp,
            FailureClassification::Transient(_) => RetryDecision::Retry(self.backoff(attempt)),
            FailureClassification::RateLimited(hint) => {
                let delay = match hint {
                    Some(hint) if *hint > self.config.max_retry_after => {
                        return RetryDecision::GiveUp;
                    }
                    Some(hint) => *hint,
                    None => self.backoff(attempt),
                };
                RetryDecision::Retry(delay.max(self.config.rate_limit_floor))
            }
        }
    }

    /// Exponential backoff for the given attempt, jitter included.
    ///
    /// Below the cap the delay is drawn from `[d, 2d)`. Once `2d` would pass
    /// `max_delay` the window slides to `[max_delay / 2, max_delay)`, so
    /// capped retries still spread out.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_backoff(attempt);
        if !self.config.jitter || delay.is_zero() {
            return delay;
        }

        let max_delay = self.config.max_delay;
        let low = delay.min(max_delay / 2);
        let high = delay.saturating_mul(2).min(max_delay);
        let span = (high - low).as_nanos().min(u64::MAX as u128) as u64;
        if span == 0 {
            return low;
        }
        low + Duration::from_nanos(rand::thread_rng().gen_range(0..span))
    }

    /// Exponential backoff without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        self.config
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_delay)
    }

    /// Upper bound on the time a request can take end to end.
    ///
    /// Every attempt can run up to the remote timeout, and every gap between
    /// attempts waits at most the larger of the backoff cap and the largest
    /// honored retry-after hint.
    pub fn worst_case_latency(&self, remote_timeout: Duration) -> Duration {
        let attempts = self.config.max_attempts;
        let longest_wait = self
            .config
            .max_delay
            .max(self.config.max_retry_after)
            .max(self.config.rate_limit_floor);
        remote_timeout.saturating_mul(attempts) + longest_wait.saturating_mul(attempts.saturating_sub(1))
    }
}
