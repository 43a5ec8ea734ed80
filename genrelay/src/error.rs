//! Error types surfaced to callers.
//!
//! Remote failures are classified into [`FailureClassification`] and resolved
//! locally through retries where possible. Only terminal outcomes reach the
//! caller as a [`RequestError`].

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failed remote call, consumed by the retry policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureClassification {
    /// Network blip, timeout or other failure that may succeed on retry.
    Transient(String),
    /// The service signalled throttling, optionally with a retry-after hint.
    RateLimited(Option<Duration>),
    /// Malformed request, unsupported input or authorization failure.
    Fatal(String),
}

impl FailureClassification {
    /// Returns a short name for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::RateLimited(_) => "rate_limited",
            Self::Fatal(_) => "fatal",
        }
    }

    /// Returns true if the failure class may be retried at all.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }
}

impl fmt::Display for FailureClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(reason) => write!(f, "transient failure: {}", reason),
            Self::RateLimited(Some(hint)) => {
                write!(f, "rate limited (retry after {}ms)", hint.as_millis())
            }
            Self::RateLimited(None) => write!(f, "rate limited"),
            Self::Fatal(reason) => write!(f, "fatal failure: {}", reason),
        }
    }
}

/// Why a request was refused locally without reaching the remote service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The scheduler queue is at its depth cap.
    QueueFull,
    /// The current pressure level does not admit this priority.
    Degraded,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "queue full"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Terminal outcome of a request that did not produce a result.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The remote service failed and retries were exhausted or not allowed.
    #[error("request failed after {attempts} attempt(s): {classification}")]
    Failed {
        classification: FailureClassification,
        attempts: u32,
    },

    /// The request was refused locally. Not retried automatically.
    #[error("request rejected: {0}")]
    Rejected(RejectReason),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The scheduler shut down before the request completed.
    #[error("scheduler shut down")]
    Shutdown,
}

impl RequestError {
    /// Returns the failure classification for remote failures.
    pub fn classification(&self) -> Option<&FailureClassification> {
        match self {
            Self::Failed { classification, .. } => Some(classification),
            _ => None,
        }
    }

    /// Returns the rejection reason for local refusals.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Returns true if resubmitting later may succeed.
    ///
    /// Rejections and exhausted transient failures qualify; fatal failures
    /// and cancellations do not.
    pub fn is_retryable_later(&self) -> bool {
        match self {
            Self::Failed { classification, .. } => classification.is_retryable(),
            Self::Rejected(_) | Self::Shutdown => true,
            Self::Cancelled => false,
        }
    }
}
