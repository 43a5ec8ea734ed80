//! Caller-side handle to a scheduled task.
//!
//! Every caller gets its own handle, including callers that joined an
//! existing task for the same fingerprint. Dropping a handle without waiting
//! is a cancellation of that caller's interest; the task itself is cancelled
//! once no caller is left.
//!
//! ```ignore
//! let handle = scheduler.submit(request, Priority::Interactive)?;
//! if handle.is_joined() {
//!     // Another caller already started this work
//! }
//! let output = handle.wait().await?;
//! ```

use super::queue::TaskId;
use super::registry::TaskRegistry;
use crate::error::RequestError;
use crate::fingerprint::RequestFingerprint;
use crate::request::GeneratedOutput;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use tokio::sync::watch;

/// Terminal outcome of a task, shared by every caller.
pub type TaskOutcome = Result<GeneratedOutput, RequestError>;

/// Handle to a scheduled task.
pub struct TaskHandle {
    id: TaskId,
    fingerprint: RequestFingerprint,
    joined: bool,
    outcome_rx: watch::Receiver<Option<TaskOutcome>>,
    registry: Weak<TaskRegistry>,
    /// Set once this caller has waited or cancelled
    released: AtomicBool,
}

impl TaskHandle {
    pub(crate) fn new(
        id: TaskId,
        fingerprint: RequestFingerprint,
        joined: bool,
        outcome_rx: watch::Receiver<Option<TaskOutcome>>,
        registry: Weak<TaskRegistry>,
    ) -> Self {
        Self {
            id,
            fingerprint,
            joined,
            outcome_rx,
            registry,
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn fingerprint(&self) -> &RequestFingerprint {
        &self.fingerprint
    }

    /// True if this caller joined a task another caller started.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Returns the outcome if the task has already completed.
    pub fn try_outcome(&self) -> Option<TaskOutcome> {
        self.outcome_rx.borrow().clone()
    }

    /// Waits for the task to complete.
    ///
    /// Returns `Cancelled` if this handle was already cancelled.
    pub async fn wait(mut self) -> TaskOutcome {
        if self.released.load(Ordering::Acquire) {
            return Err(RequestError::Cancelled);
        }

        let outcome = match self.outcome_rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(Err(RequestError::Shutdown)),
            // Sender dropped without an outcome: the scheduler went away
            Err(_) => Err(RequestError::Shutdown),
        };
        self.released.store(true, Ordering::Release);
        outcome
    }

    /// Withdraws this caller's interest in the task.
    ///
    /// Idempotent. The task is cancelled when its last caller withdraws.
    pub fn cancel(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.release_waiter(&self.fingerprint, self.id);
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .field("joined", &self.joined)
            .finish()
    }
}
