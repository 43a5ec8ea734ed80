//! Shared scheduler state: the priority queue and the in-flight registry.
//!
//! Every task lives in `inflight` from admission until it completes, keyed by
//! fingerprint, so a second request for the same content joins it instead of
//! starting another remote call. Queued tasks additionally have a slot in
//! `queue`. All mutation happens under one mutex that is never held across
//! an `.await`. The only lock taken while holding it is the cache's.

use super::handle::{TaskHandle, TaskOutcome};
use super::queue::{QueueKey, TaskId, TaskPhase};
use crate::cache::RequestCache;
use crate::error::{RejectReason, RequestError};
use crate::fingerprint::RequestFingerprint;
use crate::request::{GenerationRequest, Priority};
use crate::telemetry::TelemetryRecorder;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A task known to the scheduler.
struct InFlightTask {
    id: TaskId,
    request: Arc<GenerationRequest>,
    key: QueueKey,
    phase: TaskPhase,
    /// Remote calls started so far
    attempts: u32,
    submitted_at: Instant,
    /// Callers still interested in the result
    waiters: usize,
    token: CancellationToken,
    outcome_tx: watch::Sender<Option<TaskOutcome>>,
}

impl InFlightTask {
    fn finish(self, outcome: TaskOutcome) {
        self.token.cancel();
        self.outcome_tx.send_replace(Some(outcome));
    }
}

#[derive(Default)]
struct RegistryState {
    queue: BTreeMap<QueueKey, RequestFingerprint>,
    inflight: HashMap<RequestFingerprint, InFlightTask>,
    running: usize,
    next_sequence: u64,
}

/// Work handed to a worker.
pub(crate) struct DispatchedTask {
    pub id: TaskId,
    pub fingerprint: RequestFingerprint,
    pub request: Arc<GenerationRequest>,
    pub priority: Priority,
    pub attempt: u32,
    pub submitted_at: Instant,
    pub token: CancellationToken,
}

pub(crate) struct TaskRegistry {
    state: Mutex<RegistryState>,
    max_queue_depth: usize,
    /// Wakes the dispatcher when work or a slot becomes available
    pub(crate) work_notify: Notify,
    /// Cancelled once the scheduler shuts down
    pub(crate) closed: CancellationToken,
    telemetry: Arc<TelemetryRecorder>,
}

impl TaskRegistry {
    pub fn new(max_queue_depth: usize, telemetry: Arc<TelemetryRecorder>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            max_queue_depth: max_queue_depth.max(1),
            work_notify: Notify::new(),
            closed: CancellationToken::new(),
            telemetry,
        }
    }

    /// Joins an in-flight task for the same fingerprint or queues a new one.
    ///
    /// A joining caller with a higher priority raises the task to that
    /// priority, keeping its sequence. If `cache` already holds the result
    /// (a task finished after the caller's own cache lookup) the handle is
    /// returned already completed.
    pub fn admit(
        self: &Arc<Self>,
        request: GenerationRequest,
        priority: Priority,
        cache: Option<&RequestCache>,
    ) -> Result<TaskHandle, RequestError> {
        let fingerprint = request.fingerprint();
        let mut state = self.state.lock();

        if self.closed.is_cancelled() {
            return Err(RequestError::Shutdown);
        }

        {
            let RegistryState {
                queue, inflight, ..
            } = &mut *state;
            if let Some(task) = inflight.get_mut(&fingerprint) {
                task.waiters += 1;
                self.telemetry.record_coalesced();
                if priority > task.key.priority {
                    let raised = QueueKey {
                        priority,
                        sequence: task.key.sequence,
                    };
                    if task.phase == TaskPhase::Queued {
                        queue.remove(&task.key);
                        queue.insert(raised, fingerprint);
                    }
                    debug!(
                        task_id = %task.id,
                        from = %task.key.priority,
                        to = %priority,
                        "Raised task priority"
                    );
                    task.key = raised;
                }
                debug!(
                    task_id = %task.id,
                    fingerprint = %fingerprint.short(),
                    phase = %task.phase,
                    waiters = task.waiters,
                    "Joined in-flight task"
                );
                return Ok(TaskHandle::new(
                    task.id,
                    fingerprint,
                    true,
                    task.outcome_tx.subscribe(),
                    Arc::downgrade(self),
                ));
            }
        }

        if let Some(output) = cache.and_then(|cache| cache.peek(&fingerprint)) {
            state.next_sequence += 1;
            let id = TaskId(state.next_sequence);
            self.telemetry.record_coalesced();
            debug!(task_id = %id, fingerprint = %fingerprint.short(), "Joined completed task");
            let (_, outcome_rx) = watch::channel(Some(Ok(output)));
            return Ok(TaskHandle::new(
                id,
                fingerprint,
                true,
                outcome_rx,
                Arc::downgrade(self),
            ));
        }

        if state.queue.len() >= self.max_queue_depth && !self.shed_lowest(&mut state, priority) {
            self.telemetry.record_rejection(RejectReason::QueueFull);
            debug!(
                fingerprint = %fingerprint.short(),
                priority = %priority,
                depth = state.queue.len(),
                "Queue full, rejecting task"
            );
            return Err(RequestError::Rejected(RejectReason::QueueFull));
        }

        state.next_sequence += 1;
        let id = TaskId(state.next_sequence);
        let key = QueueKey {
            priority,
            sequence: state.next_sequence,
        };
        let (outcome_tx, outcome_rx) = watch::channel(None);

        state.queue.insert(key, fingerprint);
        state.inflight.insert(
            fingerprint,
            InFlightTask {
                id,
                request: Arc::new(request),
                key,
                phase: TaskPhase::Queued,
                attempts: 0,
                submitted_at: Instant::now(),
                waiters: 1,
                token: CancellationToken::new(),
                outcome_tx,
            },
        );
        self.telemetry.set_queued(state.queue.len());
        drop(state);

        debug!(task_id = %id, fingerprint = %fingerprint.short(), priority = %priority, "Task queued");
        self.work_notify.notify_one();

        Ok(TaskHandle::new(
            id,
            fingerprint,
            false,
            outcome_rx,
            Arc::downgrade(self),
        ))
    }

    /// Evicts the lowest-priority queued task if `incoming` outranks it.
    fn shed_lowest(&self, state: &mut RegistryState, incoming: Priority) -> bool {
        let Some((&key, &fingerprint)) = state.queue.last_key_value() else {
            return false;
        };
        if incoming <= key.priority {
            return false;
        }

        state.queue.remove(&key);
        if let Some(task) = state.inflight.remove(&fingerprint) {
            warn!(
                task_id = %task.id,
                evicted_priority = %key.priority,
                incoming_priority = %incoming,
                "Queue full, evicting lower-priority task"
            );
            self.telemetry.record_rejection(RejectReason::QueueFull);
            task.finish(Err(RequestError::Rejected(RejectReason::QueueFull)));
        }
        true
    }

    /// Pops the next task if fewer than `limit` tasks are running.
    pub fn next_dispatch(&self, limit: usize) -> Option<DispatchedTask> {
        let mut state = self.state.lock();
        if state.running >= limit || self.closed.is_cancelled() {
            return None;
        }

        let (_, fingerprint) = state.queue.pop_first()?;
        let queued = state.queue.len();
        let task = state.inflight.get_mut(&fingerprint)?;
        task.phase = TaskPhase::Running;
        task.attempts += 1;

        let dispatched = DispatchedTask {
            id: task.id,
            fingerprint,
            request: Arc::clone(&task.request),
            priority: task.key.priority,
            attempt: task.attempts,
            submitted_at: task.submitted_at,
            token: task.token.clone(),
        };

        state.running += 1;
        self.telemetry.set_queued(queued);
        self.telemetry.task_started();
        Some(dispatched)
    }

    /// Frees the worker slot held by a finished remote call.
    pub fn release_slot(&self) {
        {
            let mut state = self.state.lock();
            state.running = state.running.saturating_sub(1);
        }
        self.telemetry.task_finished();
        self.work_notify.notify_one();
    }

    /// Completes a task and delivers the outcome to its callers.
    ///
    /// Returns false if the task is no longer in flight (cancelled or
    /// evicted), in which case the outcome is discarded. Successful results
    /// are written to `cache` and telemetry is recorded before the task
    /// leaves the registry, so callers never observe an outcome ahead of its
    /// cache entry or counters.
    pub fn complete(
        &self,
        fingerprint: &RequestFingerprint,
        id: TaskId,
        outcome: TaskOutcome,
        cache: Option<&RequestCache>,
    ) -> bool {
        let mut state = self.state.lock();
        if !state.inflight.get(fingerprint).is_some_and(|task| task.id == id) {
            return false;
        }
        let Some(task) = state.inflight.remove(fingerprint) else {
            return false;
        };
        if task.phase == TaskPhase::Queued {
            state.queue.remove(&task.key);
            self.telemetry.set_queued(state.queue.len());
        }

        match &outcome {
            Ok(output) => {
                if let Some(cache) = cache {
                    cache.put(*fingerprint, output.clone(), output.size_estimate());
                }
                self.telemetry.record_completion(task.submitted_at.elapsed());
            }
            Err(RequestError::Failed { classification, .. }) => {
                self.telemetry.record_failure(classification);
            }
            Err(_) => {}
        }
        task.finish(outcome);
        true
    }

    /// Parks a running task while it waits out a retry delay.
    ///
    /// Returns false if the task was cancelled in the meantime.
    pub fn enter_backoff(&self, fingerprint: &RequestFingerprint, id: TaskId) -> bool {
        let mut state = self.state.lock();
        match state.inflight.get_mut(fingerprint) {
            Some(task) if task.id == id => {
                task.phase = TaskPhase::Backoff;
                true
            }
            _ => false,
        }
    }

    /// Puts a task back in the queue after its retry delay.
    ///
    /// Keeps the original sequence so it is not overtaken by newer work of
    /// the same priority. Bypasses the depth cap.
    pub fn requeue(&self, fingerprint: &RequestFingerprint, id: TaskId) {
        let mut state = self.state.lock();
        let Some(task) = state.inflight.get_mut(fingerprint) else {
            return;
        };
        if task.id != id || task.phase != TaskPhase::Backoff {
            return;
        }

        if self.closed.is_cancelled() {
            if let Some(task) = state.inflight.remove(fingerprint) {
                task.finish(Err(RequestError::Shutdown));
            }
            return;
        }

        task.phase = TaskPhase::Queued;
        let key = task.key;
        state.queue.insert(key, *fingerprint);
        self.telemetry.set_queued(state.queue.len());
        drop(state);

        self.work_notify.notify_one();
    }

    /// Releases one caller's interest in a task.
    ///
    /// When the last caller lets go the task is cancelled: removed from the
    /// queue if queued, its result discarded if running, its retry timer
    /// stopped if backing off.
    pub fn release_waiter(&self, fingerprint: &RequestFingerprint, id: TaskId) {
        let mut state = self.state.lock();
        let Some(task) = state.inflight.get_mut(fingerprint) else {
            return;
        };
        if task.id != id {
            return;
        }

        task.waiters = task.waiters.saturating_sub(1);
        if task.waiters > 0 {
            return;
        }

        let Some(task) = state.inflight.remove(fingerprint) else {
            return;
        };
        if task.phase == TaskPhase::Queued {
            state.queue.remove(&task.key);
            self.telemetry.set_queued(state.queue.len());
        }

        debug!(task_id = %task.id, phase = %task.phase, "Task cancelled by all callers");
        self.telemetry.record_cancelled();
        task.finish(Err(RequestError::Cancelled));
    }

    /// Stops admission and completes every queued task with `Shutdown`.
    ///
    /// Running tasks finish normally; tasks in backoff complete with
    /// `Shutdown` when their timer fires.
    pub fn close(&self) -> usize {
        let mut state = self.state.lock();
        self.closed.cancel();

        let queued = std::mem::take(&mut state.queue);
        for fingerprint in queued.values() {
            if let Some(task) = state.inflight.remove(fingerprint) {
                task.finish(Err(RequestError::Shutdown));
            }
        }
        self.telemetry.set_queued(0);
        queued.len()
    }

    pub fn queued_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn running_len(&self) -> usize {
        self.state.lock().running
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().inflight.len()
    }

    /// Current phase of the task for a fingerprint, if in flight.
    pub fn phase(&self, fingerprint: &RequestFingerprint) -> Option<TaskPhase> {
        self.state
            .lock()
            .inflight
            .get(fingerprint)
            .map(|task| task.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(depth: usize) -> Arc<TaskRegistry> {
        Arc::new(TaskRegistry::new(depth, Arc::new(TelemetryRecorder::new())))
    }

    fn request(n: u32) -> GenerationRequest {
        GenerationRequest::new(n.to_le_bytes().to_vec())
    }

    #[test]
    fn test_dispatch_order() {
        let registry = registry(10);
        let _p = registry.admit(request(1), Priority::Prefetch, None).unwrap();
        let _b = registry.admit(request(2), Priority::Background, None).unwrap();
        let _i = registry.admit(request(3), Priority::Interactive, None).unwrap();

        let order: Vec<_> = std::iter::from_fn(|| registry.next_dispatch(10))
            .map(|task| task.priority)
            .collect();
        assert_eq!(
            order,
            vec![Priority::Interactive, Priority::Background, Priority::Prefetch]
        );
        assert_eq!(registry.running_len(), 3);
    }

    #[test]
    fn test_dispatch_respects_limit() {
        let registry = registry(10);
        let _a = registry.admit(request(1), Priority::Background, None).unwrap();
        let _b = registry.admit(request(2), Priority::Background, None).unwrap();

        assert!(registry.next_dispatch(1).is_some());
        assert!(registry.next_dispatch(1).is_none());

        registry.release_slot();
        assert!(registry.next_dispatch(1).is_some());
    }

    #[test]
    fn test_duplicate_joins() {
        let registry = registry(10);
        let first = registry.admit(request(1), Priority::Background, None).unwrap();
        let second = registry.admit(request(1), Priority::Interactive, None).unwrap();

        assert!(!first.is_joined());
        assert!(second.is_joined());
        assert_eq!(first.id(), second.id());
        assert_eq!(registry.queued_len(), 1);
        assert_eq!(registry.in_flight_len(), 1);
    }

    #[test]
    fn test_higher_priority_joiner_raises_queued_task() {
        let registry = registry(2);
        let _prefetch = registry.admit(request(1), Priority::Prefetch, None).unwrap();
        let interactive = registry.admit(request(1), Priority::Interactive, None).unwrap();
        let _b = registry.admit(request(2), Priority::Background, None).unwrap();

        // The raised task outranks the incoming Background task, so nothing is shed
        let err = registry.admit(request(3), Priority::Background, None).unwrap_err();
        assert_eq!(err, RequestError::Rejected(RejectReason::QueueFull));
        assert!(interactive.try_outcome().is_none());

        let first = registry.next_dispatch(10).unwrap();
        assert_eq!(first.id, interactive.id());
        assert_eq!(first.priority, Priority::Interactive);
    }

    #[test]
    fn test_raised_priority_survives_backoff() {
        let registry = registry(10);
        let _prefetch = registry.admit(request(1), Priority::Prefetch, None).unwrap();
        let task = registry.next_dispatch(1).unwrap();
        registry.release_slot();
        assert!(registry.enter_backoff(&task.fingerprint, task.id));

        let _interactive = registry.admit(request(1), Priority::Interactive, None).unwrap();
        let _b = registry.admit(request(2), Priority::Background, None).unwrap();
        registry.requeue(&task.fingerprint, task.id);

        let next = registry.next_dispatch(1).unwrap();
        assert_eq!(next.id, task.id);
        assert_eq!(next.priority, Priority::Interactive);
    }

    #[test]
    fn test_lower_priority_joiner_keeps_priority() {
        let registry = registry(10);
        let _a = registry.admit(request(1), Priority::Interactive, None).unwrap();
        let _b = registry.admit(request(1), Priority::Prefetch, None).unwrap();

        assert_eq!(registry.next_dispatch(1).unwrap().priority, Priority::Interactive);
    }

    #[test]
    fn test_admit_answers_from_cache_filled_after_lookup() {
        let telemetry = Arc::new(TelemetryRecorder::new());
        let registry = Arc::new(TaskRegistry::new(10, Arc::clone(&telemetry)));
        let cache = RequestCache::new(crate::cache::CacheConfig::default());
        let done = crate::request::GeneratedOutput::new("done");
        cache.put(request(1).fingerprint(), done.clone(), done.size_estimate());

        let handle = registry
            .admit(request(1), Priority::Background, Some(&cache))
            .unwrap();
        assert!(handle.is_joined());
        assert_eq!(handle.try_outcome(), Some(Ok(done)));
        assert_eq!(registry.in_flight_len(), 0);
        assert_eq!(registry.queued_len(), 0);
        assert_eq!(telemetry.snapshot().coalesced, 1);

        // Dropping the completed handle touches nothing
        drop(handle);
        assert_eq!(telemetry.snapshot().cancelled, 0);
    }

    #[test]
    fn test_queue_full_rejects_equal_priority() {
        let registry = registry(2);
        let _a = registry.admit(request(1), Priority::Background, None).unwrap();
        let _b = registry.admit(request(2), Priority::Background, None).unwrap();

        let err = registry.admit(request(3), Priority::Background, None).unwrap_err();
        assert_eq!(err, RequestError::Rejected(RejectReason::QueueFull));
        assert_eq!(registry.queued_len(), 2);
    }

    #[test]
    fn test_queue_full_evicts_lower_priority() {
        let registry = registry(2);
        let _a = registry.admit(request(1), Priority::Background, None).unwrap();
        let evicted = registry.admit(request(2), Priority::Prefetch, None).unwrap();
        let _c = registry.admit(request(3), Priority::Interactive, None).unwrap();

        assert_eq!(registry.queued_len(), 2);
        assert_eq!(
            evicted.try_outcome(),
            Some(Err(RequestError::Rejected(RejectReason::QueueFull)))
        );
    }

    #[test]
    fn test_last_waiter_cancels_queued_task() {
        let registry = registry(10);
        let first = registry.admit(request(1), Priority::Background, None).unwrap();
        let second = registry.admit(request(1), Priority::Background, None).unwrap();

        drop(first);
        assert_eq!(registry.queued_len(), 1);

        drop(second);
        assert_eq!(registry.queued_len(), 0);
        assert_eq!(registry.in_flight_len(), 0);
    }

    #[test]
    fn test_complete_ignores_cancelled_task() {
        let registry = registry(10);
        let handle = registry.admit(request(1), Priority::Background, None).unwrap();
        let task = registry.next_dispatch(1).unwrap();
        drop(handle);

        let cache = RequestCache::new(crate::cache::CacheConfig::default());
        let delivered = registry.complete(
            &task.fingerprint,
            task.id,
            Ok(crate::request::GeneratedOutput::new("late")),
            Some(&cache),
        );
        assert!(!delivered);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_complete_records_telemetry_before_waking_callers() {
        let telemetry = Arc::new(TelemetryRecorder::new());
        let registry = Arc::new(TaskRegistry::new(10, Arc::clone(&telemetry)));
        let ok = registry.admit(request(1), Priority::Background, None).unwrap();
        let failed = registry.admit(request(2), Priority::Background, None).unwrap();

        let first = registry.next_dispatch(2).unwrap();
        let second = registry.next_dispatch(2).unwrap();
        registry.complete(
            &first.fingerprint,
            first.id,
            Ok(crate::request::GeneratedOutput::new("done")),
            None,
        );
        registry.complete(
            &second.fingerprint,
            second.id,
            Err(RequestError::Failed {
                classification: crate::error::FailureClassification::Fatal("nope".into()),
                attempts: 1,
            }),
            None,
        );

        assert!(ok.try_outcome().is_some_and(|outcome| outcome.is_ok()));
        assert!(failed.try_outcome().is_some_and(|outcome| outcome.is_err()));
        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.completions, 1);
        assert_eq!(snapshot.failures_fatal, 1);
    }

    #[test]
    fn test_backoff_and_requeue_keep_position() {
        let registry = registry(10);
        let _a = registry.admit(request(1), Priority::Background, None).unwrap();
        let task = registry.next_dispatch(1).unwrap();
        let _b = registry.admit(request(2), Priority::Background, None).unwrap();

        registry.release_slot();
        assert!(registry.enter_backoff(&task.fingerprint, task.id));
        assert_eq!(registry.phase(&task.fingerprint), Some(TaskPhase::Backoff));
        registry.requeue(&task.fingerprint, task.id);

        // Original sequence puts the retried task ahead of the newer one
        let next = registry.next_dispatch(1).unwrap();
        assert_eq!(next.id, task.id);
        assert_eq!(next.attempt, 2);
    }

    #[test]
    fn test_close_completes_queued_with_shutdown() {
        let registry = registry(10);
        let handle = registry.admit(request(1), Priority::Background, None).unwrap();

        assert_eq!(registry.close(), 1);
        assert_eq!(handle.try_outcome(), Some(Err(RequestError::Shutdown)));
        assert_eq!(
            registry.admit(request(2), Priority::Interactive, None).unwrap_err(),
            RequestError::Shutdown
        );
    }
}
