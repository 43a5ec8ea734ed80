//! Scheduler configuration.

use std::time::Duration;

/// Default maximum number of queued tasks.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 256;

/// Default timeout for a single remote call in seconds.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

/// Configuration for the task scheduler.
///
/// The worker limit is not configured here; it follows the degradation
/// controller's current limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Queued tasks beyond this are shed by priority.
    pub max_queue_depth: usize,
    /// Upper bound for one remote call. Expiry counts as a transient failure.
    pub remote_timeout: Duration,
}

impl SchedulerConfig {
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth.max(1);
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            remote_timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
        }
    }
}
