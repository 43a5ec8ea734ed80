//! Periodic telemetry reporter.
//!
//! Logs a snapshot at a fixed interval until shutdown. Optional; the
//! orchestrator starts it only when a report interval is configured.
//!
//! ```ignore
//! let reporter = SnapshotReporter::new(recorder, Duration::from_secs(30));
//! tokio::spawn(reporter.run(shutdown_token));
//! ```

use super::TelemetryRecorder;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Background task that logs telemetry snapshots.
pub struct SnapshotReporter {
    recorder: Arc<TelemetryRecorder>,
    interval: Duration,
}

impl SnapshotReporter {
    /// Creates a reporter logging every `interval`.
    pub fn new(recorder: Arc<TelemetryRecorder>, interval: Duration) -> Self {
        Self { recorder, interval }
    }

    /// Logs one snapshot immediately.
    pub fn report(&self) {
        let snapshot = self.recorder.snapshot();
        info!(
            hits = snapshot.cache_hits,
            misses = snapshot.cache_misses,
            hit_rate = %format!("{:.1}%", snapshot.hit_rate() * 100.0),
            coalesced = snapshot.coalesced,
            retries = snapshot.retries,
            failures = snapshot.failures,
            rejected = snapshot.rejections(),
            active = snapshot.active_tasks,
            queued = snapshot.queued_tasks,
            pressure = %snapshot.pressure_level,
            limit = snapshot.concurrency_limit,
            "Telemetry snapshot"
        );
    }

    /// Runs until shutdown is signalled.
    pub async fn run(self, shutdown: CancellationToken) {
        if self.interval.is_zero() {
            return;
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.report();
                    break;
                }

                _ = interval.tick() => self.report(),
            }
        }
    }
}
