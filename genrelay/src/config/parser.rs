//! Maps `config.ini` keys onto [`ConfigFile`] fields.

use super::defaults::DEFAULT_COOLDOWN_MS;
use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;
use crate::degradation::RecoveryPolicy;
use ini::{Ini, Properties};
use std::str::FromStr;
use std::time::Duration;

/// Parses an INI document, overlaying its values on the defaults.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("cache")) {
        let s = Section::new("cache", section);
        if let Some(n) = s.number::<usize>("max_entries", "expected a whole number")? {
            config.cache.max_entries = n;
        }
        if let Some(v) = section.get("max_size") {
            config.cache.max_size_bytes = parse_size(v).map_err(|_| {
                s.invalid("max_size", v, "expected format like '64MB', '512KB', or '1GB'")
            })?;
        }
        if let Some(ms) = s.millis("max_age_ms")? {
            config.cache.max_age = (!ms.is_zero()).then_some(ms);
        }
    }

    if let Some(section) = ini.section(Some("scheduler")) {
        let s = Section::new("scheduler", section);
        if let Some(n) = s.positive("max_concurrency")? {
            config.degradation.base_limit = n;
        }
        if let Some(n) = s.positive("max_queue_depth")? {
            config.scheduler.max_queue_depth = n;
        }
        if let Some(timeout) = s.millis("remote_timeout_ms")? {
            if timeout.is_zero() {
                return Err(s.invalid("remote_timeout_ms", "0", "must be greater than zero"));
            }
            config.scheduler.remote_timeout = timeout;
        }
    }

    if let Some(section) = ini.section(Some("retry")) {
        let s = Section::new("retry", section);
        if let Some(n) = s.positive("max_attempts")? {
            config.retry.max_attempts = u32::try_from(n)
                .map_err(|_| s.invalid("max_attempts", &n.to_string(), "too many attempts"))?;
        }
        if let Some(d) = s.millis("base_delay_ms")? {
            config.retry.base_delay = d;
        }
        if let Some(d) = s.millis("max_delay_ms")? {
            config.retry.max_delay = d;
        }
        if let Some(d) = s.millis("rate_limit_floor_ms")? {
            config.retry.rate_limit_floor = d;
        }
        if let Some(d) = s.millis("max_retry_after_ms")? {
            config.retry.max_retry_after = d;
        }
        if let Some(v) = section.get("jitter") {
            config.retry.jitter =
                parse_bool(v).ok_or_else(|| s.invalid("jitter", v, "must be true or false"))?;
        }
    }

    if let Some(section) = ini.section(Some("degradation")) {
        let s = Section::new("degradation", section);
        let factor_reason = "must be between 0.0 and 1.0";
        if let Some(factor) = s.number::<f64>("elevated_factor", factor_reason)? {
            if !(0.0..=1.0).contains(&factor) {
                return Err(s.invalid("elevated_factor", &factor.to_string(), factor_reason));
            }
            config.degradation.elevated_factor = factor;
        }
        if let Some(n) = s.positive("critical_limit")? {
            config.degradation.critical_limit = n;
        }
        let percent_reason = "expected a percentage from 0 to 100";
        if let Some(percent) = s.number::<u8>("elevated_cache_percent", percent_reason)? {
            if percent > 100 {
                let value = percent.to_string();
                return Err(s.invalid("elevated_cache_percent", &value, percent_reason));
            }
            config.degradation.elevated_cache_percent = percent;
        }

        let cooldown = s.millis("cooldown_ms")?;
        let recovery = section.get("recovery").map(|v| v.trim().to_lowercase());
        config.degradation.recovery = match recovery.as_deref() {
            None | Some("explicit") => RecoveryPolicy::Explicit,
            Some("cooldown") => {
                let cooldown = cooldown.unwrap_or(Duration::from_millis(DEFAULT_COOLDOWN_MS));
                if cooldown.is_zero() {
                    return Err(s.invalid("cooldown_ms", "0", "must be greater than zero"));
                }
                RecoveryPolicy::Cooldown(cooldown)
            }
            Some(other) => {
                return Err(s.invalid("recovery", other, "must be one of: explicit, cooldown"));
            }
        };
    }

    if let Some(section) = ini.section(Some("telemetry")) {
        let s = Section::new("telemetry", section);
        if let Some(interval) = s.millis("report_interval_ms")? {
            config.telemetry.report_interval = (!interval.is_zero()).then_some(interval);
        }
    }

    Ok(config)
}

/// One INI section plus its name, for error reporting.
struct Section<'a> {
    name: &'static str,
    props: &'a Properties,
}

impl<'a> Section<'a> {
    fn new(name: &'static str, props: &'a Properties) -> Self {
        Self { name, props }
    }

    fn invalid(&self, key: &str, value: &str, reason: &str) -> ConfigFileError {
        ConfigFileError::InvalidValue {
            section: self.name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn number<T: FromStr>(&self, key: &str, reason: &str) -> Result<Option<T>, ConfigFileError> {
        self.props
            .get(key)
            .map(|v| v.trim().parse().map_err(|_| self.invalid(key, v, reason)))
            .transpose()
    }

    fn positive(&self, key: &str) -> Result<Option<usize>, ConfigFileError> {
        match self.number::<usize>(key, "expected a whole number")? {
            Some(0) => Err(self.invalid(key, "0", "must be at least 1")),
            other => Ok(other),
        }
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>, ConfigFileError> {
        Ok(self
            .number::<u64>(key, "expected a duration in milliseconds")?
            .map(Duration::from_millis))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ConfigFile, ConfigFileError> {
        parse_ini(&Ini::load_from_str(text).unwrap())
    }

    #[test]
    fn test_empty_document_gives_defaults() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_parses_every_section() {
        let config = parse(
            r#"
[cache]
max_entries = 50
max_size = 8MB
max_age_ms = 60000

[scheduler]
max_concurrency = 6
max_queue_depth = 40
remote_timeout_ms = 2500

[retry]
max_attempts = 4
base_delay_ms = 100
max_delay_ms = 5000
rate_limit_floor_ms = 750
max_retry_after_ms = 20000
jitter = false

[degradation]
elevated_factor = 0.25
critical_limit = 2
elevated_cache_percent = 30
recovery = cooldown
cooldown_ms = 1500

[telemetry]
report_interval_ms = 10000
"#,
        )
        .unwrap();

        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.cache.max_size_bytes, 8 * 1024 * 1024);
        assert_eq!(config.cache.max_age, Some(Duration::from_secs(60)));
        assert_eq!(config.degradation.base_limit, 6);
        assert_eq!(config.scheduler.max_queue_depth, 40);
        assert_eq!(config.scheduler.remote_timeout, Duration::from_millis(2500));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.retry.max_delay, Duration::from_secs(5));
        assert_eq!(config.retry.rate_limit_floor, Duration::from_millis(750));
        assert_eq!(config.retry.max_retry_after, Duration::from_secs(20));
        assert!(!config.retry.jitter);
        assert_eq!(config.degradation.elevated_factor, 0.25);
        assert_eq!(config.degradation.critical_limit, 2);
        assert_eq!(config.degradation.elevated_cache_percent, 30);
        assert_eq!(
            config.degradation.recovery,
            RecoveryPolicy::Cooldown(Duration::from_millis(1500))
        );
        assert_eq!(
            config.telemetry.report_interval,
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_zero_durations_disable_optional_features() {
        let config =
            parse("[cache]\nmax_age_ms = 0\n[telemetry]\nreport_interval_ms = 0\n").unwrap();
        assert_eq!(config.cache.max_age, None);
        assert_eq!(config.telemetry.report_interval, None);
    }

    #[test]
    fn test_cooldown_without_duration_uses_default() {
        let config = parse("[degradation]\nrecovery = Cooldown\n").unwrap();
        assert_eq!(
            config.degradation.recovery,
            RecoveryPolicy::Cooldown(Duration::from_millis(DEFAULT_COOLDOWN_MS))
        );
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let cases = [
            ("[cache]\nmax_size = lots\n", "max_size"),
            ("[scheduler]\nmax_concurrency = 0\n", "max_concurrency"),
            ("[scheduler]\nremote_timeout_ms = 0\n", "remote_timeout_ms"),
            ("[retry]\njitter = maybe\n", "jitter"),
            ("[retry]\nmax_attempts = 5000000000\n", "max_attempts"),
            ("[degradation]\nelevated_factor = 1.5\n", "elevated_factor"),
            ("[degradation]\nelevated_cache_percent = 101\n", "elevated_cache_percent"),
            ("[degradation]\nrecovery = sometimes\n", "recovery"),
        ];

        for (text, expected_key) in cases {
            match parse(text) {
                Err(ConfigFileError::InvalidValue { key, .. }) => assert_eq!(key, expected_key),
                other => panic!("expected invalid {}, got {:?}", expected_key, other),
            }
        }
    }
}
