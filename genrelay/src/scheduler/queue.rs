//! Queue ordering and task identity.

use crate::request::Priority;
use std::cmp::Ordering;
use std::fmt;

/// Unique identifier of a scheduled task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Position of a task in the priority queue.
///
/// Ordered so the first key is the next task to dispatch: higher priority
/// first, then lower sequence (FIFO within a priority). The last key is the
/// lowest-priority, newest task, which is the first to be evicted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QueueKey {
    pub priority: Priority,
    pub sequence: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first
        match other.priority.cmp(&self.priority) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // Lower sequence (earlier submission) first
        self.sequence.cmp(&other.sequence)
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Where an in-flight task currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskPhase {
    /// Waiting in the queue for a worker slot.
    Queued,
    /// Holding a worker slot, remote call in progress.
    Running,
    /// Waiting out a retry delay without a slot.
    Backoff,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Backoff => write!(f, "backoff"),
        }
    }
}
