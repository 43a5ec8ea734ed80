//! Request orchestration.
//!
//! The [`Orchestrator`] is what applications talk to. It owns one instance
//! of every resilience component and routes each request through them.
//!
//! ```ignore
//! use genrelay::{GenerationRequest, Orchestrator, OrchestratorConfig, Priority};
//!
//! let orchestrator = Arc::new(Orchestrator::new(my_service, OrchestratorConfig::default()));
//! let shutdown = CancellationToken::new();
//! tokio::spawn({
//!     let orchestrator = Arc::clone(&orchestrator);
//!     let shutdown = shutdown.clone();
//!     async move { orchestrator.run(shutdown).await }
//! });
//!
//! let request = GenerationRequest::new(image_bytes).with_param("style", "watercolor");
//! let output = orchestrator.request(request, Priority::Interactive).await?;
//! ```

mod config;
mod pending;
mod relay;

pub use config::OrchestratorConfig;
pub use pending::PendingRequest;
pub use relay::Orchestrator;
