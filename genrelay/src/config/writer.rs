//! Renders a [`ConfigFile`] as commented INI.

use super::defaults::DEFAULT_COOLDOWN_MS;
use super::settings::ConfigFile;
use super::size::format_size;
use crate::degradation::RecoveryPolicy;
use std::time::Duration;

fn millis(duration: Duration) -> u128 {
    duration.as_millis()
}

/// Produces the text written to `config.ini`.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let (recovery, cooldown_ms) = match config.degradation.recovery {
        RecoveryPolicy::Explicit => ("explicit", DEFAULT_COOLDOWN_MS as u128),
        RecoveryPolicy::Cooldown(cooldown) => ("cooldown", millis(cooldown)),
    };

    format!(
        r#"[cache]
; Maximum number of cached results
max_entries = {}
; Total size budget for cached results (e.g. 64MB, 512KB, 1GB)
max_size = {}
; Results older than this are refetched (milliseconds, 0 = never expire)
max_age_ms = {}

[scheduler]
; Concurrent remote calls under normal pressure
max_concurrency = {}
; Queued requests beyond this shed the lowest priority work
max_queue_depth = {}
; Upper bound for a single remote call (milliseconds)
remote_timeout_ms = {}

[retry]
; Total attempts per request, including the first
max_attempts = {}
; Backoff before the first retry, doubled each attempt (milliseconds)
base_delay_ms = {}
; Backoff cap (milliseconds)
max_delay_ms = {}
; Minimum wait after the service reports throttling (milliseconds)
rate_limit_floor_ms = {}
; Largest retry-after hint honored (milliseconds)
max_retry_after_ms = {}
; Randomize backoff to spread out retries (true/false)
jitter = {}

[degradation]
; Fraction of max_concurrency kept under elevated pressure (0.0 - 1.0)
elevated_factor = {}
; Concurrent remote calls under critical pressure
critical_limit = {}
; Percentage of the cache budget kept under elevated pressure
elevated_cache_percent = {}
; How pressure is relaxed:
;   explicit - only when the platform reports a lower level
;   cooldown - one level down after cooldown_ms without pressure events
recovery = {}
cooldown_ms = {}

[telemetry]
; Log a telemetry snapshot this often (milliseconds, 0 = disabled)
report_interval_ms = {}
"#,
        config.cache.max_entries,
        format_size(config.cache.max_size_bytes),
        config.cache.max_age.map(millis).unwrap_or(0),
        config.degradation.base_limit,
        config.scheduler.max_queue_depth,
        millis(config.scheduler.remote_timeout),
        config.retry.max_attempts,
        millis(config.retry.base_delay),
        millis(config.retry.max_delay),
        millis(config.retry.rate_limit_floor),
        millis(config.retry.max_retry_after),
        config.retry.jitter,
        config.degradation.elevated_factor,
        config.degradation.critical_limit,
        config.degradation.elevated_cache_percent,
        recovery,
        cooldown_ms,
        config.telemetry.report_interval.map(millis).unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_ini;
    use super::*;
    use ini::Ini;

    #[test]
    fn test_written_defaults_parse_back_to_defaults() {
        let text = to_config_string(&ConfigFile::default());
        let parsed = parse_ini(&Ini::load_from_str(&text).unwrap()).unwrap();
        assert_eq!(parsed, ConfigFile::default());
    }

    #[test]
    fn test_cooldown_recovery_is_written() {
        let mut config = ConfigFile::default();
        config.degradation.recovery = RecoveryPolicy::Cooldown(Duration::from_millis(4200));

        let text = to_config_string(&config);
        assert!(text.contains("recovery = cooldown"));
        assert!(text.contains("cooldown_ms = 4200"));
    }
}
