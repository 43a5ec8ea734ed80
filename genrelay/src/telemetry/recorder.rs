//! Atomic telemetry counters.
//!
//! Counters use `AtomicU64`/`AtomicUsize` with `Relaxed` ordering, so no
//! update is ever lost. To give [`TelemetryRecorder::snapshot`] a consistent
//! view across counters, writers hold a shared gate while they update and the
//! snapshot takes the gate exclusively while it copies. Writers only wait for
//! the duration of one copy.

use super::TelemetrySnapshot;
use crate::degradation::PressureLevel;
use crate::error::{FailureClassification, RejectReason};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe counters shared by every component.
pub struct TelemetryRecorder {
    /// When recording started
    start_time: Instant,
    /// Shared by writers, exclusive for snapshots
    gate: RwLock<()>,

    // === Cache ===
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    // === Scheduling ===
    /// Callers attached to an existing in-flight task
    coalesced: AtomicU64,
    retries: AtomicU64,
    rejected_queue_full: AtomicU64,
    rejected_degraded: AtomicU64,
    cancelled: AtomicU64,
    active_tasks: AtomicUsize,
    queued_tasks: AtomicUsize,

    // === Outcomes ===
    failures_transient: AtomicU64,
    failures_rate_limited: AtomicU64,
    failures_fatal: AtomicU64,
    completions: AtomicU64,
    /// Sum of completion latencies in microseconds
    completion_time_us: AtomicU64,
    /// Slowest completion in microseconds
    max_completion_time_us: AtomicU64,

    // === Degradation gauges ===
    pressure_level: AtomicU8,
    concurrency_limit: AtomicUsize,
}

impl TelemetryRecorder {
    /// Creates a recorder with all counters at zero.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            gate: RwLock::new(()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            rejected_queue_full: AtomicU64::new(0),
            rejected_degraded: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            active_tasks: AtomicUsize::new(0),
            queued_tasks: AtomicUsize::new(0),
            failures_transient: AtomicU64::new(0),
            failures_rate_limited: AtomicU64::new(0),
            failures_fatal: AtomicU64::new(0),
            completions: AtomicU64::new(0),
            completion_time_us: AtomicU64::new(0),
            max_completion_time_us: AtomicU64::new(0),
            pressure_level: AtomicU8::new(PressureLevel::Normal.as_u8()),
            concurrency_limit: AtomicUsize::new(0),
        }
    }

    // === Cache tracking ===

    /// Record a cache hit.
    pub fn record_hit(&self) {
        let _gate = self.gate.read();
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss.
    pub fn record_miss(&self) {
        let _gate = self.gate.read();
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    // === Scheduling ===

    /// Record a caller joining an in-flight task.
    pub fn record_coalesced(&self) {
        let _gate = self.gate.read();
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry being scheduled.
    pub fn record_retry(&self) {
        let _gate = self.gate.read();
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a local rejection.
    pub fn record_rejection(&self, reason: RejectReason) {
        let _gate = self.gate.read();
        match reason {
            RejectReason::QueueFull => self.rejected_queue_full.fetch_add(1, Ordering::Relaxed),
            RejectReason::Degraded => self.rejected_degraded.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a task being cancelled by its callers.
    pub fn record_cancelled(&self) {
        let _gate = self.gate.read();
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task occupying a worker slot.
    pub fn task_started(&self) {
        let _gate = self.gate.read();
        self.active_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task releasing its worker slot.
    pub fn task_finished(&self) {
        let _gate = self.gate.read();
        self.active_tasks.fetch_sub(1, Ordering::Relaxed);
    }

    /// Update the queued task gauge.
    pub fn set_queued(&self, queued: usize) {
        let _gate = self.gate.read();
        self.queued_tasks.store(queued, Ordering::Relaxed);
    }

    // === Outcomes ===

    /// Record a terminal failure.
    pub fn record_failure(&self, classification: &FailureClassification) {
        let _gate = self.gate.read();
        let counter = match classification {
            FailureClassification::Transient(_) => &self.failures_transient,
            FailureClassification::RateLimited(_) => &self.failures_rate_limited,
            FailureClassification::Fatal(_) => &self.failures_fatal,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful completion and its end-to-end latency.
    pub fn record_completion(&self, duration: Duration) {
        let micros = duration.as_micros().min(u64::MAX as u128) as u64;
        let _gate = self.gate.read();
        self.completions.fetch_add(1, Ordering::Relaxed);
        self.completion_time_us.fetch_add(micros, Ordering::Relaxed);
        self.max_completion_time_us
            .fetch_max(micros, Ordering::Relaxed);
    }

    // === Degradation ===

    /// Mirror the current pressure level and concurrency limit.
    pub fn record_pressure(&self, level: PressureLevel, concurrency_limit: usize) {
        let _gate = self.gate.read();
        self.pressure_level.store(level.as_u8(), Ordering::Relaxed);
        self.concurrency_limit
            .store(concurrency_limit, Ordering::Relaxed);
    }

    /// Takes a consistent point-in-time copy of every counter.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let _gate = self.gate.write();

        let failures_transient = self.failures_transient.load(Ordering::Relaxed);
        let failures_rate_limited = self.failures_rate_limited.load(Ordering::Relaxed);
        let failures_fatal = self.failures_fatal.load(Ordering::Relaxed);

        TelemetrySnapshot {
            uptime: self.start_time.elapsed(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: failures_transient + failures_rate_limited + failures_fatal,
            failures_transient,
            failures_rate_limited,
            failures_fatal,
            rejected_queue_full: self.rejected_queue_full.load(Ordering::Relaxed),
            rejected_degraded: self.rejected_degraded.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            total_completion_time: Duration::from_micros(
                self.completion_time_us.load(Ordering::Relaxed),
            ),
            max_completion_time: Duration::from_micros(
                self.max_completion_time_us.load(Ordering::Relaxed),
            ),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            pressure_level: PressureLevel::from_u8(self.pressure_level.load(Ordering::Relaxed)),
            concurrency_limit: self.concurrency_limit.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TelemetryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryRecorder")
            .field("uptime", &self.start_time.elapsed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let snapshot = TelemetryRecorder::new().snapshot();
        assert_eq!(snapshot.cache_hits, 0);
        assert_eq!(snapshot.failures, 0);
        assert_eq!(snapshot.active_tasks, 0);
        assert_eq!(snapshot.pressure_level, PressureLevel::Normal);
    }

    #[test]
    fn test_failures_by_class() {
        let recorder = TelemetryRecorder::new();
        recorder.record_failure(&FailureClassification::Transient("x".into()));
        recorder.record_failure(&FailureClassification::RateLimited(None));
        recorder.record_failure(&FailureClassification::Fatal("y".into()));
        recorder.record_failure(&FailureClassification::Fatal("z".into()));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.failures, 4);
        assert_eq!(snapshot.failures_transient, 1);
        assert_eq!(snapshot.failures_rate_limited, 1);
        assert_eq!(snapshot.failures_fatal, 2);
    }

    #[test]
    fn test_rejections_by_reason() {
        let recorder = TelemetryRecorder::new();
        recorder.record_rejection(RejectReason::QueueFull);
        recorder.record_rejection(RejectReason::Degraded);
        recorder.record_rejection(RejectReason::Degraded);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.rejected_queue_full, 1);
        assert_eq!(snapshot.rejected_degraded, 2);
    }

    #[test]
    fn test_completion_timing() {
        let recorder = TelemetryRecorder::new();
        recorder.record_completion(Duration::from_millis(10));
        recorder.record_completion(Duration::from_millis(30));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.completions, 2);
        assert_eq!(snapshot.total_completion_time, Duration::from_millis(40));
        assert_eq!(snapshot.max_completion_time, Duration::from_millis(30));
        assert_eq!(snapshot.average_completion_ms(), 20.0);
    }

    #[test]
    fn test_active_task_gauge() {
        let recorder = TelemetryRecorder::new();
        recorder.task_started();
        recorder.task_started();
        recorder.task_finished();
        recorder.set_queued(7);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.active_tasks, 1);
        assert_eq!(snapshot.queued_tasks, 7);
    }

    #[test]
    fn test_pressure_gauge() {
        let recorder = TelemetryRecorder::new();
        recorder.record_pressure(PressureLevel::Critical, 1);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.pressure_level, PressureLevel::Critical);
        assert_eq!(snapshot.concurrency_limit, 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let recorder = Arc::new(TelemetryRecorder::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        recorder.record_hit();
                        recorder.record_miss();
                        recorder.record_retry();
                    }
                })
            })
            .collect();

        // Hits are recorded before misses by every writer.
        for _ in 0..50 {
            let snapshot = recorder.snapshot();
            assert!(snapshot.cache_hits >= snapshot.cache_misses);
            assert!(snapshot.cache_hits <= 8000);
        }

        for thread in threads {
            thread.join().unwrap();
        }

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.cache_hits, 8000);
        assert_eq!(snapshot.cache_misses, 8000);
        assert_eq!(snapshot.retries, 8000);
    }
}
