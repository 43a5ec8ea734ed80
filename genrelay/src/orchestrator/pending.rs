//! Non-blocking request handle returned by `Orchestrator::submit`.

use crate::error::RequestError;
use crate::request::GeneratedOutput;
use crate::scheduler::{TaskHandle, TaskOutcome};

/// A request that may still be in progress.
#[derive(Debug)]
pub enum PendingRequest {
    /// Answered from the cache.
    Cached(GeneratedOutput),
    /// Scheduled (or joined) on the task scheduler.
    Scheduled(TaskHandle),
    /// Refused before scheduling.
    Rejected(RequestError),
}

impl PendingRequest {
    /// Waits for the outcome.
    pub async fn wait(self) -> TaskOutcome {
        match self {
            Self::Cached(output) => Ok(output),
            Self::Scheduled(handle) => handle.wait().await,
            Self::Rejected(error) => Err(error),
        }
    }

    /// Withdraws interest. Cancels the underlying task if no other caller
    /// is waiting on it.
    pub fn cancel(self) {
        if let Self::Scheduled(handle) = self {
            handle.cancel();
        }
    }

    pub fn is_cache_hit(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    /// True if this request joined work started by another caller.
    pub fn is_joined(&self) -> bool {
        matches!(self, Self::Scheduled(handle) if handle.is_joined())
    }

    /// Returns the outcome if already known, without waiting.
    pub fn try_outcome(&self) -> Option<TaskOutcome> {
        match self {
            Self::Cached(output) => Some(Ok(output.clone())),
            Self::Scheduled(handle) => handle.try_outcome(),
            Self::Rejected(error) => Some(Err(error.clone())),
        }
    }
}
