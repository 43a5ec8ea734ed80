//! Task scheduler - main struct and dispatch loop.

use super::config::SchedulerConfig;
use super::handle::TaskHandle;
use super::registry::TaskRegistry;
use super::worker::WorkerContext;
use crate::cache::RequestCache;
use crate::degradation::DegradationController;
use crate::error::{RejectReason, RequestError};
use crate::remote::GenerationService;
use crate::request::{GenerationRequest, Priority};
use crate::retry::RetryPolicy;
use crate::telemetry::TelemetryRecorder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bounded-concurrency priority scheduler for remote generation calls.
///
/// - Admits tasks into a single priority queue (deduplicated by fingerprint)
/// - Dispatches while fewer tasks run than the controller's current limit
/// - Retries failed attempts through the retry policy without holding a slot
/// - Sheds low-priority work when the queue is full
///
/// Nothing is dispatched until [`TaskScheduler::run`] is driven.
pub struct TaskScheduler<S> {
    config: SchedulerConfig,
    controller: Arc<DegradationController>,
    telemetry: Arc<TelemetryRecorder>,
    registry: Arc<TaskRegistry>,
    worker: Arc<WorkerContext<S>>,
}

impl<S: GenerationService> TaskScheduler<S> {
    /// Creates a scheduler for `service`.
    pub fn new(
        service: Arc<S>,
        config: SchedulerConfig,
        retry: RetryPolicy,
        controller: Arc<DegradationController>,
        telemetry: Arc<TelemetryRecorder>,
    ) -> Self {
        let registry = Arc::new(TaskRegistry::new(
            config.max_queue_depth,
            Arc::clone(&telemetry),
        ));
        let worker = Arc::new(WorkerContext {
            service,
            registry: Arc::clone(&registry),
            retry,
            telemetry: Arc::clone(&telemetry),
            cache: None,
            remote_timeout: config.remote_timeout,
        });

        Self {
            config,
            controller,
            telemetry,
            registry,
            worker,
        }
    }

    /// Writes successful results into `cache` before callers are notified.
    ///
    /// Must be called before the scheduler is shared.
    pub fn with_cache(mut self, cache: Arc<RequestCache>) -> Self {
        if let Some(worker) = Arc::get_mut(&mut self.worker) {
            worker.cache = Some(cache);
        }
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Name of the remote service, for logging.
    pub fn service_name(&self) -> &str {
        self.worker.service.name()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.worker.retry
    }

    /// Submits a request.
    ///
    /// Returns immediately with a handle. A request whose fingerprint is
    /// already queued, running or backing off joins that task, raising its
    /// priority if the new caller's is higher. A request whose result landed
    /// in the cache gets an already completed handle.
    pub fn submit(
        &self,
        request: GenerationRequest,
        priority: Priority,
    ) -> Result<TaskHandle, RequestError> {
        if !self.controller.should_accept_priority(priority) {
            self.telemetry.record_rejection(RejectReason::Degraded);
            debug!(priority = %priority, level = %self.controller.level(), "Rejecting under pressure");
            return Err(RequestError::Rejected(RejectReason::Degraded));
        }

        self.registry
            .admit(request, priority, self.worker.cache.as_deref())
    }

    /// Withdraws one caller's interest. Equivalent to [`TaskHandle::cancel`].
    pub fn cancel(&self, handle: &TaskHandle) {
        handle.cancel();
    }

    /// Runs the dispatcher until shutdown is signalled.
    ///
    /// On shutdown every queued task completes with
    /// [`RequestError::Shutdown`]; running tasks finish on their own.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut levels = self.controller.subscribe();

        info!(
            max_queue_depth = self.config.max_queue_depth,
            concurrency_limit = self.controller.current_limit(),
            remote_timeout_ms = self.config.remote_timeout.as_millis() as u64,
            "Scheduler started"
        );

        loop {
            self.dispatch_ready();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    let drained = self.registry.close();
                    info!(drained, "Scheduler shutting down");
                    break;
                }

                _ = self.registry.work_notify.notified() => {}

                Ok(()) = levels.changed() => {
                    debug!(
                        level = %*levels.borrow_and_update(),
                        limit = self.controller.current_limit(),
                        "Concurrency limit changed"
                    );
                }
            }
        }
    }

    /// Spawns workers while slots are free.
    fn dispatch_ready(&self) {
        loop {
            let limit = self.controller.current_limit();
            let Some(task) = self.registry.next_dispatch(limit) else {
                return;
            };
            tokio::spawn(Arc::clone(&self.worker).execute(task));
        }
    }

    /// Completes every queued task with `Shutdown` and refuses new work.
    pub fn close(&self) -> usize {
        self.registry.close()
    }

    pub fn is_closed(&self) -> bool {
        self.registry.closed.is_cancelled()
    }

    /// Tasks waiting for a slot.
    pub fn queued_len(&self) -> usize {
        self.registry.queued_len()
    }

    /// Tasks holding a slot.
    pub fn running_len(&self) -> usize {
        self.registry.running_len()
    }

    /// Distinct tasks not yet completed (queued, running or backing off).
    pub fn in_flight_len(&self) -> usize {
        self.registry.in_flight_len()
    }
}

impl<S> std::fmt::Debug for TaskScheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::degradation::{DegradationConfig, PressureLevel};
    use crate::error::FailureClassification;
    use crate::remote::RemoteFailure;
    use crate::request::GeneratedOutput;
    use crate::retry::RetryConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sleeps, then echoes the input or fails fatally on `"reject"`.
    struct SleepyService {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl GenerationService for SleepyService {
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GeneratedOutput, RemoteFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if &request.input()[..] == b"reject" {
                return Err(RemoteFailure::fatal("content policy"));
            }
            Ok(GeneratedOutput::new(request.input().clone()))
        }

        fn name(&self) -> &str {
            "sleepy"
        }
    }

    fn scheduler(delay: Duration, config: SchedulerConfig) -> Arc<TaskScheduler<SleepyService>> {
        let service = Arc::new(SleepyService {
            delay,
            calls: AtomicUsize::new(0),
        });
        let retry = RetryPolicy::new(
            RetryConfig::default()
                .with_max_attempts(2)
                .with_base_delay(Duration::from_millis(5))
                .with_jitter(false),
        );
        Arc::new(TaskScheduler::new(
            service,
            config,
            retry,
            Arc::new(DegradationController::new(DegradationConfig::new(2))),
            Arc::new(TelemetryRecorder::new()),
        ))
    }

    fn run(scheduler: &Arc<TaskScheduler<SleepyService>>) -> CancellationToken {
        let shutdown = CancellationToken::new();
        tokio::spawn({
            let scheduler = Arc::clone(scheduler);
            let shutdown = shutdown.clone();
            async move { scheduler.run(shutdown).await }
        });
        shutdown
    }

    #[tokio::test]
    async fn test_nothing_dispatches_until_run() {
        let scheduler = scheduler(Duration::from_millis(1), SchedulerConfig::default());
        let handle = scheduler
            .submit(GenerationRequest::new("a"), Priority::Background)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.queued_len(), 1);
        assert_eq!(scheduler.running_len(), 0);

        let shutdown = run(&scheduler);
        assert_eq!(handle.wait().await, Ok(GeneratedOutput::new("a")));
        assert_eq!(scheduler.in_flight_len(), 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_fatal_failure_reaches_caller() {
        let scheduler = scheduler(Duration::from_millis(1), SchedulerConfig::default());
        let shutdown = run(&scheduler);

        let outcome = scheduler
            .submit(GenerationRequest::new("reject"), Priority::Interactive)
            .unwrap()
            .wait()
            .await;
        assert_eq!(
            outcome,
            Err(RequestError::Failed {
                classification: FailureClassification::Fatal("content policy".into()),
                attempts: 1,
            })
        );
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_timeout_is_retried_then_reported_transient() {
        let config = SchedulerConfig::default().with_remote_timeout(Duration::from_millis(10));
        let scheduler = scheduler(Duration::from_millis(200), config);
        let shutdown = run(&scheduler);

        let outcome = scheduler
            .submit(GenerationRequest::new("slow"), Priority::Interactive)
            .unwrap()
            .wait()
            .await;
        match outcome {
            Err(RequestError::Failed {
                classification: FailureClassification::Transient(_),
                attempts,
            }) => assert_eq!(attempts, 2),
            other => panic!("expected transient failure, got {:?}", other),
        }
        assert_eq!(scheduler.running_len(), 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_critical_pressure_refuses_background() {
        let scheduler = scheduler(Duration::from_millis(1), SchedulerConfig::default());
        scheduler
            .controller
            .on_pressure_change(PressureLevel::Critical);

        let err = scheduler
            .submit(GenerationRequest::new("a"), Priority::Background)
            .unwrap_err();
        assert_eq!(err, RequestError::Rejected(RejectReason::Degraded));
        assert_eq!(scheduler.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_admission() {
        let scheduler = scheduler(Duration::from_millis(1), SchedulerConfig::default());
        let shutdown = run(&scheduler);
        shutdown.cancel();

        for _ in 0..100 {
            if scheduler.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(scheduler.is_closed());
        assert_eq!(
            scheduler
                .submit(GenerationRequest::new("late"), Priority::Interactive)
                .unwrap_err(),
            RequestError::Shutdown
        );
    }
}
