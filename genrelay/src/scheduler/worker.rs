//! Execution of one dispatched attempt.
//!
//! A worker holds a slot for exactly one remote call. On a retryable failure
//! it frees the slot, parks the task in backoff and leaves a detached timer
//! to put it back in the queue.

use super::registry::{DispatchedTask, TaskRegistry};
use crate::cache::RequestCache;
use crate::error::{FailureClassification, RequestError};
use crate::remote::GenerationService;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::telemetry::TelemetryRecorder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything a worker needs, shared by all workers.
pub(crate) struct WorkerContext<S> {
    pub service: Arc<S>,
    pub registry: Arc<TaskRegistry>,
    pub retry: RetryPolicy,
    pub telemetry: Arc<TelemetryRecorder>,
    pub cache: Option<Arc<RequestCache>>,
    pub remote_timeout: Duration,
}

impl<S: GenerationService> WorkerContext<S> {
    /// Runs one attempt and settles the task.
    pub async fn execute(self: Arc<Self>, task: DispatchedTask) {
        debug!(
            task_id = %task.id,
            fingerprint = %task.fingerprint.short(),
            attempt = task.attempt,
            service = self.service.name(),
            "Task started"
        );

        let result = match tokio::time::timeout(
            self.remote_timeout,
            self.service.generate(&task.request),
        )
        .await
        {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(failure)) => Err(failure.classify()),
            Err(_) => Err(FailureClassification::Transient(format!(
                "remote call timed out after {}ms",
                self.remote_timeout.as_millis()
            ))),
        };

        self.registry.release_slot();

        if task.token.is_cancelled() {
            debug!(task_id = %task.id, "Discarding result of cancelled task");
            return;
        }

        match result {
            Ok(output) => {
                let cache = self.cache.as_deref();
                if self
                    .registry
                    .complete(&task.fingerprint, task.id, Ok(output), cache)
                {
                    debug!(task_id = %task.id, attempt = task.attempt, "Task completed");
                }
            }
            Err(classification) => self.handle_failure(task, classification),
        }
    }

    fn handle_failure(self: Arc<Self>, task: DispatchedTask, classification: FailureClassification) {
        match self.retry.decide(task.attempt, &classification) {
            RetryDecision::Retry(delay) => {
                if !self.registry.enter_backoff(&task.fingerprint, task.id) {
                    return;
                }
                self.telemetry.record_retry();
                debug!(
                    task_id = %task.id,
                    attempt = task.attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %classification,
                    "Retrying task"
                );
                self.schedule_requeue(task, delay);
            }
            RetryDecision::GiveUp => {
                let error = RequestError::Failed {
                    classification: classification.clone(),
                    attempts: task.attempt,
                };
                if self
                    .registry
                    .complete(&task.fingerprint, task.id, Err(error), None)
                {
                    warn!(
                        task_id = %task.id,
                        fingerprint = %task.fingerprint.short(),
                        attempts = task.attempt,
                        reason = %classification,
                        "Task failed"
                    );
                }
            }
        }
    }

    /// Re-enters the task after `delay` unless it is cancelled first.
    fn schedule_requeue(&self, task: DispatchedTask, delay: Duration) {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = task.token.cancelled() => {}

                _ = registry.closed.cancelled() => {
                    registry.requeue(&task.fingerprint, task.id);
                }

                _ = tokio::time::sleep(delay) => {
                    registry.requeue(&task.fingerprint, task.id);
                }
            }
        });
    }
}
