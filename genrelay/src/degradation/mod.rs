//! Pressure-driven graceful degradation.
//!
//! The platform reports memory or thermal pressure as a [`PressureLevel`].
//! The [`DegradationController`] turns that level into the limits every other
//! component reads: worker concurrency, whether cache writes are allowed, how
//! much of the cache budget is usable, and which priorities are admitted.
//!
//! ```text
//! Normal   full concurrency, caching on,  all priorities
//! Elevated reduced concurrency, smaller cache budget, all priorities
//! Critical minimal concurrency, no cache writes, interactive only
//! ```

mod config;
mod controller;
mod listener;

pub use config::{DegradationConfig, RecoveryPolicy};
pub use controller::{DegradationController, DegradationState};
pub use listener::PressureSender;

use std::fmt;
use std::str::FromStr;

/// Platform pressure level, ordered `Normal < Elevated < Critical`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PressureLevel {
    #[default]
    Normal,
    Elevated,
    Critical,
}

impl PressureLevel {
    /// Returns the lowercase name used in config files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::Critical => "critical",
        }
    }

    /// Returns the next lower level, if any.
    pub fn step_down(&self) -> Option<Self> {
        match self {
            Self::Normal => None,
            Self::Elevated => Some(Self::Normal),
            Self::Critical => Some(Self::Elevated),
        }
    }

    pub(crate) fn as_u8(&self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Elevated => 1,
            Self::Critical => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Normal,
            1 => Self::Elevated,
            _ => Self::Critical,
        }
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PressureLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "elevated" => Ok(Self::Elevated),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "unknown pressure level '{}': expected normal, elevated or critical",
                other
            )),
        }
    }
}

/// A pressure notification from the platform.
///
/// Sequences increase monotonically at the source, starting at 1. An event
/// whose sequence is not greater than the last applied one is stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PressureEvent {
    pub level: PressureLevel,
    pub sequence: u64,
}

impl PressureEvent {
    pub fn new(level: PressureLevel, sequence: u64) -> Self {
        Self { level, sequence }
    }
}
