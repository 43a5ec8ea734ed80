//! Resilience telemetry.
//!
//! [`TelemetryRecorder`] collects counters from every component and
//! [`TelemetrySnapshot`] is a consistent copy for display. Counters are
//! lifetime totals and never reset.

mod recorder;
mod reporter;
mod snapshot;

pub use recorder::TelemetryRecorder;
pub use reporter::SnapshotReporter;
pub use snapshot::TelemetrySnapshot;
