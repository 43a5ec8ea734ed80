//! genrelay - client-side resilience for remote AI generation services
//!
//! Sits between request callers and a slow, rate-limited generation
//! service. Requests are deduplicated and cached by fingerprint, scheduled
//! by priority under a concurrency limit, retried with backoff on transient
//! failures, and shed when the platform reports resource pressure.
//!
//! # High-Level API
//!
//! The [`Orchestrator`] is the entry point:
//!
//! ```ignore
//! use genrelay::{ConfigFile, GenerationRequest, Orchestrator, Priority};
//!
//! let config = ConfigFile::load()?.to_orchestrator_config();
//! let orchestrator = Arc::new(Orchestrator::new(my_service, config));
//! tokio::spawn({
//!     let orchestrator = Arc::clone(&orchestrator);
//!     async move { orchestrator.run(shutdown).await }
//! });
//!
//! let output = orchestrator
//!     .request(GenerationRequest::new(image).with_param("style", "sketch"), Priority::Interactive)
//!     .await?;
//! ```

pub mod cache;
pub mod config;
pub mod degradation;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod orchestrator;
pub mod remote;
pub mod request;
pub mod retry;
pub mod scheduler;
pub mod telemetry;

pub use config::ConfigFile;
pub use degradation::{PressureEvent, PressureLevel};
pub use error::{FailureClassification, RejectReason, RequestError};
pub use fingerprint::RequestFingerprint;
pub use orchestrator::{Orchestrator, OrchestratorConfig, PendingRequest};
pub use remote::{GenerationService, RemoteFailure};
pub use request::{GeneratedOutput, GenerationRequest, Priority};
pub use telemetry::TelemetrySnapshot;

/// Version of the genrelay library and CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
