//! Request and result types exchanged with callers and the remote service.

use crate::fingerprint::RequestFingerprint;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Fixed per-entry overhead added to payload sizes for cache accounting.
pub const OUTPUT_OVERHEAD_BYTES: usize = 64;

/// Scheduling priority of a request.
///
/// Ordered so that `Interactive > Background > Prefetch`. Higher priorities
/// are dispatched first and are the last to be shed under pressure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Speculative work the user has not asked for yet.
    Prefetch,
    /// Work the user asked for but is not actively waiting on.
    Background,
    /// A user is waiting on the result.
    Interactive,
}

impl Priority {
    /// All priorities, lowest first.
    pub const ALL: [Priority; 3] = [Priority::Prefetch, Priority::Background, Priority::Interactive];

    /// Returns the lowercase name used in config files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prefetch => "prefetch",
            Self::Background => "background",
            Self::Interactive => "interactive",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prefetch" => Ok(Self::Prefetch),
            "background" => Ok(Self::Background),
            "interactive" => Ok(Self::Interactive),
            other => Err(format!(
                "unknown priority '{}': expected interactive, background or prefetch",
                other
            )),
        }
    }
}

/// A generation or enhancement request.
///
/// The input is opaque to this crate (an image, a prompt, a serialized
/// document). Parameters are kept sorted so the fingerprint is independent
/// of the order they were added in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    input: Bytes,
    parameters: BTreeMap<String, String>,
}

impl GenerationRequest {
    /// Creates a request with no parameters.
    pub fn new(input: impl Into<Bytes>) -> Self {
        Self {
            input: input.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Adds or replaces a generation parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Returns the raw input.
    pub fn input(&self) -> &Bytes {
        &self.input
    }

    /// Returns the generation parameters in key order.
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Returns a parameter value.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Computes the request fingerprint.
    pub fn fingerprint(&self) -> RequestFingerprint {
        RequestFingerprint::compute(&self.input, &self.parameters)
    }
}

/// Result payload returned by the remote service.
///
/// The payload is immutable and reference counted, so handing the same
/// output to several deduplicated callers and to the cache is cheap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedOutput {
    payload: Bytes,
    content_type: Option<String>,
}

impl GeneratedOutput {
    /// Creates an output from a payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            content_type: None,
        }
    }

    /// Sets the payload content type (e.g. `image/png`).
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the content type, if the service reported one.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Estimated memory footprint used for cache budgeting.
    pub fn size_estimate(&self) -> usize {
        self.payload.len()
            + self.content_type.as_ref().map_or(0, String::len)
            + OUTPUT_OVERHEAD_BYTES
    }
}
