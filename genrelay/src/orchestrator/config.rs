//! Combined configuration for the orchestrator.

use crate::cache::CacheConfig;
use crate::degradation::DegradationConfig;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::scheduler::SchedulerConfig;
use std::time::Duration;

/// Configuration for every component the orchestrator owns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrchestratorConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub degradation: DegradationConfig,
    /// Interval for periodic telemetry log lines. `None` disables them.
    pub report_interval: Option<Duration>,
}

impl OrchestratorConfig {
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_degradation(mut self, degradation: DegradationConfig) -> Self {
        self.degradation = degradation;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = if interval.is_zero() { None } else { Some(interval) };
        self
    }

    /// Upper bound on the time any request takes to resolve.
    pub fn worst_case_latency(&self) -> Duration {
        RetryPolicy::new(self.retry.clone()).worst_case_latency(self.scheduler.remote_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_report_interval_disables_reporting() {
        let config = OrchestratorConfig::default().with_report_interval(Duration::ZERO);
        assert_eq!(config.report_interval, None);

        let config = config.with_report_interval(Duration::from_secs(5));
        assert_eq!(config.report_interval, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_worst_case_latency_uses_remote_timeout() {
        let config = OrchestratorConfig::default()
            .with_scheduler(SchedulerConfig::default().with_remote_timeout(Duration::from_secs(1)))
            .with_retry(
                RetryConfig::default()
                    .with_max_attempts(2)
                    .with_max_delay(Duration::from_secs(3))
                    .with_max_retry_after(Duration::from_secs(4)),
            );
        assert_eq!(config.worst_case_latency(), Duration::from_secs(2 + 4));
    }
}
