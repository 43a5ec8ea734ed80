//! Point-in-time telemetry snapshot.
//!
//! Provides an immutable view of counters for display and reporting.

use crate::degradation::PressureLevel;
use std::fmt;
use std::time::Duration;

/// A point-in-time snapshot of resilience counters.
///
/// This is an immutable copy taken under the recorder's snapshot gate, so
/// every counter reflects the same instant.
#[derive(Clone, Debug, PartialEq)]
pub struct TelemetrySnapshot {
    /// How long the recorder has been running
    pub uptime: Duration,

    // === Cache ===
    /// Requests answered from the cache
    pub cache_hits: u64,
    /// Requests that had to be scheduled
    pub cache_misses: u64,

    // === Scheduling ===
    /// Callers attached to an existing in-flight task
    pub coalesced: u64,
    /// Retries scheduled after a remote failure
    pub retries: u64,
    /// Tasks refused or evicted because the queue was full
    pub rejected_queue_full: u64,
    /// Requests refused because of the pressure level
    pub rejected_degraded: u64,
    /// Tasks cancelled by all of their callers
    pub cancelled: u64,
    /// Tasks currently holding a worker slot
    pub active_tasks: usize,
    /// Tasks currently waiting in the queue
    pub queued_tasks: usize,

    // === Outcomes ===
    /// Terminal remote failures across all classes
    pub failures: u64,
    /// Terminal transient failures
    pub failures_transient: u64,
    /// Terminal rate-limited failures
    pub failures_rate_limited: u64,
    /// Terminal fatal failures
    pub failures_fatal: u64,
    /// Successful completions
    pub completions: u64,
    /// Sum of completion latencies
    pub total_completion_time: Duration,
    /// Slowest completion
    pub max_completion_time: Duration,

    // === Degradation ===
    /// Current pressure level
    pub pressure_level: PressureLevel,
    /// Current concurrency limit
    pub concurrency_limit: usize,
}

impl TelemetrySnapshot {
    /// Returns the cache hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Returns the terminal failure rate (0.0 - 1.0).
    pub fn failure_rate(&self) -> f64 {
        let total = self.completions + self.failures;
        if total == 0 {
            0.0
        } else {
            self.failures as f64 / total as f64
        }
    }

    /// Returns the coalescing rate (0.0 - 1.0).
    ///
    /// Ratio of coalesced callers to cache misses.
    pub fn coalescing_rate(&self) -> f64 {
        if self.cache_misses == 0 {
            0.0
        } else {
            self.coalesced as f64 / self.cache_misses as f64
        }
    }

    /// Returns the mean completion latency in milliseconds.
    pub fn average_completion_ms(&self) -> f64 {
        if self.completions == 0 {
            0.0
        } else {
            self.total_completion_time.as_secs_f64() * 1000.0 / self.completions as f64
        }
    }

    /// Returns total local rejections.
    pub fn rejections(&self) -> u64 {
        self.rejected_queue_full + self.rejected_degraded
    }

    /// Returns uptime in human-readable format.
    pub fn uptime_human(&self) -> String {
        format_duration(self.uptime)
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Resilience Telemetry (uptime: {})", self.uptime_human())?;
        writeln!(f, "─────────────────────────────────────────")?;
        writeln!(f)?;

        // Cache
        writeln!(f, "Cache:")?;
        writeln!(
            f,
            "  {:.1}% hit rate ({} hits, {} misses)",
            self.hit_rate() * 100.0,
            self.cache_hits,
            self.cache_misses
        )?;
        writeln!(f)?;

        // Tasks
        writeln!(f, "Tasks:")?;
        writeln!(
            f,
            "  Completed: {} (avg {}, max {})",
            self.completions,
            format_millis(self.average_completion_ms()),
            format_millis(self.max_completion_time.as_secs_f64() * 1000.0)
        )?;
        writeln!(f, "  Active: {}", self.active_tasks)?;
        writeln!(f, "  Queued: {}", self.queued_tasks)?;
        writeln!(
            f,
            "  Coalesced: {} ({:.1}%)",
            self.coalesced,
            self.coalescing_rate() * 100.0
        )?;
        writeln!(f, "  Retries: {}", self.retries)?;
        writeln!(f, "  Cancelled: {}", self.cancelled)?;
        writeln!(f)?;

        // Failures
        writeln!(f, "Failures:")?;
        writeln!(
            f,
            "  Total: {} ({:.2}%)",
            self.failures,
            self.failure_rate() * 100.0
        )?;
        writeln!(
            f,
            "  Transient: {}  Rate limited: {}  Fatal: {}",
            self.failures_transient, self.failures_rate_limited, self.failures_fatal
        )?;
        writeln!(
            f,
            "  Rejected: {} queue full, {} degraded",
            self.rejected_queue_full, self.rejected_degraded
        )?;
        writeln!(f)?;

        // Pressure
        writeln!(f, "Pressure:")?;
        writeln!(
            f,
            "  Level: {} (concurrency limit {})",
            self.pressure_level, self.concurrency_limit
        )?;

        Ok(())
    }
}

/// Format milliseconds in human-readable form.
fn format_millis(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{:.1}ms", ms)
    }
}

/// Format duration in human-readable form.
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}
