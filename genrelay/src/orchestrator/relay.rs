//! The orchestrator facade.

use super::{OrchestratorConfig, PendingRequest};
use crate::cache::{CacheStats, RequestCache};
use crate::degradation::{DegradationController, PressureEvent, PressureLevel, PressureSender};
use crate::error::{RejectReason, RequestError};
use crate::remote::GenerationService;
use crate::request::{GeneratedOutput, GenerationRequest, Priority};
use crate::retry::RetryPolicy;
use crate::scheduler::TaskScheduler;
use crate::telemetry::{SnapshotReporter, TelemetryRecorder, TelemetrySnapshot};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Single entry point for callers.
///
/// Wires the cache, scheduler, degradation controller and telemetry around
/// one remote service:
///
/// 1. Fingerprint the request
/// 2. Cache hit: return immediately
/// 3. Miss: check admission under the current pressure level
/// 4. Schedule (or join) a task and wait for it
/// 5. Successful results are cached by the scheduler before callers wake
pub struct Orchestrator<S> {
    config: OrchestratorConfig,
    cache: Arc<RequestCache>,
    controller: Arc<DegradationController>,
    telemetry: Arc<TelemetryRecorder>,
    scheduler: Arc<TaskScheduler<S>>,
}

impl<S: GenerationService> Orchestrator<S> {
    /// Creates an orchestrator around `service`.
    ///
    /// Call [`Orchestrator::run`] (usually in a spawned task) to start
    /// dispatching.
    pub fn new(service: S, config: OrchestratorConfig) -> Self {
        Self::with_shared_service(Arc::new(service), config)
    }

    /// Creates an orchestrator around a service shared with other owners.
    pub fn with_shared_service(service: Arc<S>, config: OrchestratorConfig) -> Self {
        let telemetry = Arc::new(TelemetryRecorder::new());
        let controller = Arc::new(
            DegradationController::new(config.degradation.clone())
                .with_telemetry(Arc::clone(&telemetry)),
        );
        let cache = Arc::new(
            RequestCache::new(config.cache.clone()).with_degradation(Arc::clone(&controller)),
        );
        let scheduler = Arc::new(
            TaskScheduler::new(
                service,
                config.scheduler.clone(),
                RetryPolicy::new(config.retry.clone()),
                Arc::clone(&controller),
                Arc::clone(&telemetry),
            )
            .with_cache(Arc::clone(&cache)),
        );

        Self {
            config,
            cache,
            controller,
            telemetry,
            scheduler,
        }
    }

    /// Resolves a request, waiting for the remote service if needed.
    pub async fn request(
        &self,
        request: GenerationRequest,
        priority: Priority,
    ) -> Result<GeneratedOutput, RequestError> {
        self.submit(request, priority).wait().await
    }

    /// Starts resolving a request without waiting.
    pub fn submit(&self, request: GenerationRequest, priority: Priority) -> PendingRequest {
        let fingerprint = request.fingerprint();

        if let Some(entry) = self.cache.get(&fingerprint) {
            self.telemetry.record_hit();
            debug!(fingerprint = %fingerprint.short(), "Cache hit");
            return PendingRequest::Cached(entry.output);
        }
        self.telemetry.record_miss();

        if !self.controller.should_accept_priority(priority) {
            self.telemetry.record_rejection(RejectReason::Degraded);
            debug!(
                fingerprint = %fingerprint.short(),
                priority = %priority,
                level = %self.controller.level(),
                "Rejecting under pressure"
            );
            return PendingRequest::Rejected(RequestError::Rejected(RejectReason::Degraded));
        }

        match self.scheduler.submit(request, priority) {
            Ok(handle) => PendingRequest::Scheduled(handle),
            Err(error) => PendingRequest::Rejected(error),
        }
    }

    /// Reports a new pressure level from the platform.
    pub fn on_pressure_change(&self, level: PressureLevel) {
        self.controller.on_pressure_change(level);
        self.shrink_cache_if_needed();
    }

    /// Applies a sequenced pressure event. Returns false if it was stale.
    pub fn apply_pressure(&self, event: PressureEvent) -> bool {
        let applied = self.controller.apply(event);
        if applied {
            self.shrink_cache_if_needed();
        }
        applied
    }

    fn shrink_cache_if_needed(&self) {
        shrink_cache(&self.cache, self.controller.level());
    }

    /// Creates a pressure channel whose sender shares the controller's
    /// sequence, so it interleaves correctly with [`Orchestrator::on_pressure_change`].
    pub fn pressure_channel(
        &self,
        capacity: usize,
    ) -> (PressureSender, mpsc::Receiver<PressureEvent>) {
        self.controller.pressure_channel(capacity)
    }

    /// Applies pressure events from a channel until shutdown.
    ///
    /// The cache is shrunk for these events by the watcher started in
    /// [`Orchestrator::run`].
    pub fn listen_for_pressure(
        &self,
        rx: mpsc::Receiver<PressureEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        self.controller.spawn_listener(rx, shutdown)
    }

    /// Point-in-time telemetry.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Runs the dispatcher and background tasks until shutdown.
    ///
    /// Cooldown recovery and periodic reporting are started only when
    /// configured.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            service = self.scheduler.service_name(),
            worst_case_latency_ms = self.config.worst_case_latency().as_millis() as u64,
            recovery = %self.controller.config().recovery,
            "Orchestrator starting"
        );

        let recovery = tokio::spawn(Arc::clone(&self.controller).run_recovery(shutdown.clone()));
        let shrinker = tokio::spawn(shrink_on_pressure(
            Arc::clone(&self.cache),
            self.controller.subscribe(),
            shutdown.clone(),
        ));
        let reporter = self.config.report_interval.map(|interval| {
            let reporter = SnapshotReporter::new(Arc::clone(&self.telemetry), interval);
            tokio::spawn(reporter.run(shutdown.clone()))
        });

        self.scheduler.run(shutdown).await;

        let _ = recovery.await;
        let _ = shrinker.await;
        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }
        info!("Orchestrator stopped");
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<RequestCache> {
        &self.cache
    }

    pub fn controller(&self) -> &Arc<DegradationController> {
        &self.controller
    }

    pub fn telemetry(&self) -> &Arc<TelemetryRecorder> {
        &self.telemetry
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler<S>> {
        &self.scheduler
    }
}

fn shrink_cache(cache: &RequestCache, level: PressureLevel) {
    if level == PressureLevel::Elevated {
        let evicted = cache.enforce_budget();
        if evicted > 0 {
            debug!(evicted, "Shrunk cache to pressure budget");
        }
    }
}

/// Shrinks the cache whenever the level changes to Elevated, whatever the
/// source of the change (channel events, cooldown recovery).
async fn shrink_on_pressure(
    cache: Arc<RequestCache>,
    mut levels: watch::Receiver<PressureLevel>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            changed = levels.changed() => {
                if changed.is_err() {
                    break;
                }
                let level = *levels.borrow_and_update();
                shrink_cache(&cache, level);
            }
        }
    }
}
