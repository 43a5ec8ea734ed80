//! Remote generation service contract.
//!
//! The remote service is an opaque, possibly slow, possibly rate-limited
//! collaborator. Implementations wrap an HTTP client, an SDK or a test mock.
//!
//! # Example
//!
//! ```ignore
//! use genrelay::remote::{GenerationService, RemoteFailure};
//! use genrelay::{GenerationRequest, GeneratedOutput};
//!
//! struct EchoService;
//!
//! impl GenerationService for EchoService {
//!     async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedOutput, RemoteFailure> {
//!         Ok(GeneratedOutput::new(request.input().clone()))
//!     }
//!
//!     fn name(&self) -> &str { "echo" }
//! }
//! ```

use crate::error::FailureClassification;
use crate::request::{GenerationRequest, GeneratedOutput};
use std::future::Future;
use std::time::Duration;

/// Trait for the remote content-generation service.
pub trait GenerationService: Send + Sync + 'static {
    /// Runs one generation call.
    ///
    /// The call may not be interruptible. A caller that loses interest lets
    /// it finish in the background and discards the result.
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<GeneratedOutput, RemoteFailure>> + Send;

    /// Returns the service name for logging.
    fn name(&self) -> &str;
}

/// Failure reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    /// Human-readable error message from the service.
    pub reason: String,
    /// Whether the service considers the failure transient.
    pub retryable: bool,
    /// Whether the failure is a throttling response.
    pub throttled: bool,
    /// Service-provided retry-after hint.
    pub retry_after: Option<Duration>,
}

impl RemoteFailure {
    /// Creates a transient failure (network blip, 5xx, timeout).
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
            throttled: false,
            retry_after: None,
        }
    }

    /// Creates a throttling failure with an optional retry-after hint.
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            reason: "rate limited".to_string(),
            retryable: true,
            throttled: true,
            retry_after,
        }
    }

    /// Creates a permanent failure (bad request, unsupported input, auth).
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
            throttled: false,
            retry_after: None,
        }
    }

    /// Interprets the failure for the retry policy.
    ///
    /// Non-retryable failures are fatal regardless of any hint. A retry-after
    /// hint on a retryable failure implies throttling.
    pub fn classify(&self) -> FailureClassification {
        if !self.retryable {
            FailureClassification::Fatal(self.reason.clone())
        } else if self.throttled || self.retry_after.is_some() {
            FailureClassification::RateLimited(self.retry_after)
        } else {
            FailureClassification::Transient(self.reason.clone())
        }
    }
}

impl std::fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for RemoteFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transient() {
        let failure = RemoteFailure::transient("connection reset");
        assert_eq!(
            failure.classify(),
            FailureClassification::Transient("connection reset".into())
        );
    }

    #[test]
    fn test_classify_rate_limited() {
        let hint = Some(Duration::from_secs(2));
        assert_eq!(
            RemoteFailure::rate_limited(hint).classify(),
            FailureClassification::RateLimited(hint)
        );
        assert_eq!(
            RemoteFailure::rate_limited(None).classify(),
            FailureClassification::RateLimited(None)
        );
    }

    #[test]
    fn test_retry_after_implies_throttling() {
        let failure = RemoteFailure {
            reason: "busy".into(),
            retryable: true,
            throttled: false,
            retry_after: Some(Duration::from_millis(250)),
        };
        assert_eq!(
            failure.classify(),
            FailureClassification::RateLimited(Some(Duration::from_millis(250)))
        );
    }

    #[test]
    fn test_non_retryable_is_fatal_even_with_hint() {
        let failure = RemoteFailure {
            reason: "unauthorized".into(),
            retryable: false,
            throttled: true,
            retry_after: Some(Duration::from_secs(1)),
        };
        assert_eq!(
            failure.classify(),
            FailureClassification::Fatal("unauthorized".into())
        );
    }
}
