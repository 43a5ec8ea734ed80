//! Degradation configuration.

use std::fmt;
use std::time::Duration;

/// Default fraction of the base concurrency kept under Elevated pressure.
pub const DEFAULT_ELEVATED_FACTOR: f64 = 0.5;

/// Default worker limit under Critical pressure.
pub const DEFAULT_CRITICAL_LIMIT: usize = 1;

/// Default share of the cache budget usable under Elevated pressure.
pub const DEFAULT_ELEVATED_CACHE_PERCENT: u8 = 50;

/// How the controller returns to lower pressure levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    /// Only pressure events change the level.
    #[default]
    Explicit,
    /// Step down one level after this long without a pressure event.
    Cooldown(Duration),
}

impl fmt::Display for RecoveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Cooldown(d) => write!(f, "cooldown ({}ms)", d.as_millis()),
        }
    }
}

/// Configuration for the degradation controller.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradationConfig {
    /// Worker limit under Normal pressure.
    pub base_limit: usize,
    /// Fraction of `base_limit` kept under Elevated pressure (0.0 - 1.0).
    pub elevated_factor: f64,
    /// Worker limit under Critical pressure.
    pub critical_limit: usize,
    /// Percentage of the cache budget usable under Elevated pressure.
    pub elevated_cache_percent: u8,
    /// Recovery behaviour.
    pub recovery: RecoveryPolicy,
}

impl DegradationConfig {
    /// Creates a config with the given Normal worker limit.
    pub fn new(base_limit: usize) -> Self {
        Self {
            base_limit: base_limit.max(1),
            ..Self::default()
        }
    }

    pub fn with_elevated_factor(mut self, factor: f64) -> Self {
        self.elevated_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn with_critical_limit(mut self, limit: usize) -> Self {
        self.critical_limit = limit.max(1);
        self
    }

    pub fn with_elevated_cache_percent(mut self, percent: u8) -> Self {
        self.elevated_cache_percent = percent.min(100);
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Worker limit under Elevated pressure, never below 1.
    pub fn elevated_limit(&self) -> usize {
        ((self.base_limit as f64 * self.elevated_factor).floor() as usize).max(1)
    }
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            base_limit: crate::config::default_concurrency(),
            elevated_factor: DEFAULT_ELEVATED_FACTOR,
            critical_limit: DEFAULT_CRITICAL_LIMIT,
            elevated_cache_percent: DEFAULT_ELEVATED_CACHE_PERCENT,
            recovery: RecoveryPolicy::Explicit,
        }
    }
}
