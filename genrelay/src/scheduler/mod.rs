//! Priority task scheduling for remote generation calls.
//!
//! # Architecture
//!
//! ```text
//! submit ──► admission (dedup, degraded check, backpressure)
//!              │
//!              ▼
//!          priority queue ──► dispatcher ──► worker (one remote call)
//!              ▲                                │
//!              │                 failure ───────┤
//!              └── retry timer ◄── Retry(delay) │
//!                                               ▼
//!                                 complete: cache write, notify callers
//! ```
//!
//! The dispatcher wakes on new work, freed slots and pressure changes.

mod config;
mod core;
mod handle;
mod queue;
mod registry;
mod worker;

pub use config::{SchedulerConfig, DEFAULT_MAX_QUEUE_DEPTH, DEFAULT_REMOTE_TIMEOUT_SECS};
pub use core::TaskScheduler;
pub use handle::{TaskHandle, TaskOutcome};
pub use queue::{TaskId, TaskPhase};
