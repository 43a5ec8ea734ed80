//! Typed contents of the config file.

use super::defaults::DEFAULT_REPORT_INTERVAL_MS;
use crate::cache::CacheConfig;
use crate::degradation::DegradationConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::retry::RetryConfig;
use crate::scheduler::SchedulerConfig;
use std::time::Duration;

/// Everything `config.ini` can set.
///
/// The concurrency limit lives in the `[scheduler]` section of the file but
/// is carried by [`DegradationConfig::base_limit`], since the controller is
/// what scales it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigFile {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub degradation: DegradationConfig,
    pub telemetry: TelemetrySettings,
}

/// `[telemetry]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySettings {
    /// Periodic snapshot log interval. `None` disables it.
    pub report_interval: Option<Duration>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            report_interval: match DEFAULT_REPORT_INTERVAL_MS {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }
}

impl ConfigFile {
    /// Builds the runtime configuration.
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        let config = OrchestratorConfig::default()
            .with_cache(self.cache.clone())
            .with_scheduler(self.scheduler.clone())
            .with_retry(self.retry.clone())
            .with_degradation(self.degradation.clone());

        match self.telemetry.report_interval {
            Some(interval) => config.with_report_interval(interval),
            None => config,
        }
    }
}

impl From<&ConfigFile> for OrchestratorConfig {
    fn from(file: &ConfigFile) -> Self {
        file.to_orchestrator_config()
    }
}
