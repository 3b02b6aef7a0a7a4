//! Deployment settings, resolved from string key/value pairs.
//!
//! The firmware bakes its values in at compile time while the replay tool
//! reads them from the process environment, so parsing only ever sees a
//! lookup function.

use core::{fmt, str::FromStr, time::Duration};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse `{value}` as {expected}")]
    Invalid { key: &'static str, value: String, expected: &'static str },
    #[error("{key} is required when {because} is set")]
    Missing { key: &'static str, because: &'static str },
    #[error("{key} must be non-zero")]
    Zero { key: &'static str },
}

/// What an accepted `Inactive` edge does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InactivePolicy {
    /// Log the edge and nothing else.
    #[default]
    LogOnly,
    /// Also report it to the time-series sink.
    TimeSeries,
}

/// Which edge kinds go through the minimum-delay filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebounceScope {
    #[default]
    ActiveOnly,
    /// Both kinds share one window, restarted by every accepted edge.
    AllEdges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::Https => "https",
        })
    }
}

/// Where a sink lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Base URL without a trailing slash.
    pub fn base(&self) -> String {
        let Self { protocol, host, port } = self;
        format!("{protocol}://{host}:{port}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomoticzConfig {
    pub endpoint: Endpoint,
    /// Device index of the counter, also used as `rid` when reading it back.
    pub idx: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfluxConfig {
    pub endpoint: Endpoint,
    pub db: String,
    pub query_prefix: String,
    pub increment: f64,
    pub credentials: Option<(String, String)>,
}

/// Line sensor sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorConfig {
    pub pin: i32,
    pub sample_rate_hz: u32,
    pub queue_len: usize,
    pub active_low: bool,
}

impl SensorConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_secs(1) / self.sample_rate_hz
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub sensor: SensorConfig,
    pub min_delay: Duration,
    pub inactive_policy: InactivePolicy,
    pub debounce_scope: DebounceScope,
    pub domoticz: Option<DomoticzConfig>,
    pub influx: Option<InfluxConfig>,
    pub http_timeout: Duration,
    pub reconcile_attempts: u32,
    pub reconcile_backoff: Duration,
    pub log_file: Option<PathBuf>,
    pub wifi_ssid: Option<String>,
    pub wifi_password: Option<String>,
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn text(&self, key: &'static str) -> Option<String> {
        (self.0)(key).map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError> {
        match self.text(key) {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value, expected }),
            None => Ok(default),
        }
    }

    fn non_zero<T: FromStr + Default + PartialEq>(
        &self,
        key: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        let value = self.parse(key, default, expected)?;
        if value == T::default() {
            return Err(ConfigError::Zero { key });
        }
        Ok(value)
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default, "milliseconds").map(Duration::from_millis)
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.text(key) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value, expected: "a boolean" }),
        }
    }

    fn choice<T: Copy>(&self, key: &'static str, default: T, options: &[(&str, T)], expected: &'static str) -> Result<T, ConfigError> {
        let Some(value) = self.text(key) else {
            return Ok(default);
        };
        let lowered = value.to_ascii_lowercase();
        options
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|&(_, choice)| choice)
            .ok_or(ConfigError::Invalid { key, value, expected })
    }

    fn required<T: FromStr>(&self, key: &'static str, because: &'static str, expected: &'static str) -> Result<T, ConfigError> {
        let value = self.text(key).ok_or(ConfigError::Missing { key, because })?;
        value.parse().map_err(|_| ConfigError::Invalid { key, value, expected })
    }

    fn endpoint(&self, prefix: Prefix, host: String, default_port: u16) -> Result<Endpoint, ConfigError> {
        let protocol = self.choice(
            prefix.protocol,
            Protocol::Http,
            &[("http", Protocol::Http), ("https", Protocol::Https)],
            "`http` or `https`",
        )?;
        let port = self.non_zero(prefix.port, default_port, "a TCP port")?;
        Ok(Endpoint { protocol, host, port })
    }
}

#[derive(Clone, Copy)]
struct Prefix {
    protocol: &'static str,
    port: &'static str,
}

impl Config {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Lookup(lookup);

        let sensor = SensorConfig {
            pin: env.parse("METER_PIN", 4, "a GPIO number")?,
            sample_rate_hz: env.non_zero("METER_SAMPLE_RATE_HZ", 40, "a frequency in Hz")?,
            queue_len: env.non_zero("METER_QUEUE_LEN", 10, "a sample count")?,
            active_low: env.flag("METER_ACTIVE_LOW", true)?,
        };

        let inactive_policy = env.choice(
            "METER_INACTIVE_POLICY",
            InactivePolicy::LogOnly,
            &[("log", InactivePolicy::LogOnly), ("timeseries", InactivePolicy::TimeSeries)],
            "`log` or `timeseries`",
        )?;
        let debounce_scope = env.choice(
            "METER_DEBOUNCE_SCOPE",
            DebounceScope::ActiveOnly,
            &[("active", DebounceScope::ActiveOnly), ("all", DebounceScope::AllEdges)],
            "`active` or `all`",
        )?;

        let domoticz = match env.text("DOMOTICZ_HOST") {
            Some(host) => Some(DomoticzConfig {
                endpoint: env.endpoint(Prefix { protocol: "DOMOTICZ_PROTOCOL", port: "DOMOTICZ_PORT" }, host, 8080)?,
                idx: env.required("DOMOTICZ_IDX", "DOMOTICZ_HOST", "a device index")?,
            }),
            None => None,
        };

        let influx = match env.text("INFLUX_HOST") {
            Some(host) => {
                let increment = env.parse("INFLUX_INCREMENT", 0.5, "a number")?;
                if !f64::is_finite(increment) {
                    return Err(ConfigError::Invalid { key: "INFLUX_INCREMENT", value: increment.to_string(), expected: "a finite number" });
                }
                let credentials = match (env.text("INFLUX_USER"), env.text("INFLUX_PASSWORD")) {
                    (Some(user), Some(password)) => Some((user, password)),
                    (Some(_), None) => return Err(ConfigError::Missing { key: "INFLUX_PASSWORD", because: "INFLUX_USER" }),
                    (None, Some(_)) => return Err(ConfigError::Missing { key: "INFLUX_USER", because: "INFLUX_PASSWORD" }),
                    (None, None) => None,
                };
                Some(InfluxConfig {
                    endpoint: env.endpoint(Prefix { protocol: "INFLUX_PROTOCOL", port: "INFLUX_PORT" }, host, 8086)?,
                    db: env.required("INFLUX_DB", "INFLUX_HOST", "a database name")?,
                    query_prefix: (env.0)("INFLUX_QUERY_PREFIX").unwrap_or_else(|| "water,type=usage value=".into()),
                    increment,
                    credentials,
                })
            }
            None => None,
        };

        Ok(Self {
            sensor,
            min_delay: env.millis("METER_MIN_DELAY_MS", 500)?,
            inactive_policy,
            debounce_scope,
            domoticz,
            influx,
            http_timeout: env.millis("HTTP_TIMEOUT_MS", 5000)?,
            reconcile_attempts: env.non_zero("RECONCILE_ATTEMPTS", 10, "an attempt count")?,
            reconcile_backoff: env.millis("RECONCILE_BACKOFF_MS", 10_000)?,
            log_file: env.text("METER_LOG_FILE").map(PathBuf::from),
            wifi_ssid: env.text("WIFI_SSID"),
            wifi_password: (env.0)("WIFI_PASSWORD"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|&(k, v)| (k.into(), v.into())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_kitchen_deployment() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.sensor, SensorConfig { pin: 4, sample_rate_hz: 40, queue_len: 10, active_low: true });
        assert_eq!(config.sensor.sample_period(), Duration::from_millis(25));
        assert_eq!(config.min_delay, Duration::from_millis(500));
        assert_eq!(config.inactive_policy, InactivePolicy::LogOnly);
        assert_eq!(config.debounce_scope, DebounceScope::ActiveOnly);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.reconcile_attempts, 10);
        assert_eq!(config.reconcile_backoff, Duration::from_secs(10));
        assert!(config.domoticz.is_none());
        assert!(config.influx.is_none());
        assert!(config.log_file.is_none());
    }

    #[test]
    fn sinks_are_enabled_by_their_host() {
        let config = parse(&[
            ("DOMOTICZ_HOST", "127.0.0.1"),
            ("DOMOTICZ_PROTOCOL", "HTTPS"),
            ("DOMOTICZ_PORT", "10443"),
            ("DOMOTICZ_IDX", "23"),
            ("INFLUX_HOST", "influx.lan"),
            ("INFLUX_DB", "smarthome"),
            ("INFLUX_INCREMENT", "1"),
            ("INFLUX_USER", "meter"),
            ("INFLUX_PASSWORD", "hunter2"),
            ("METER_INACTIVE_POLICY", "timeseries"),
            ("METER_DEBOUNCE_SCOPE", "all"),
        ])
        .unwrap();

        let domoticz = config.domoticz.unwrap();
        assert_eq!(domoticz.endpoint.base(), "https://127.0.0.1:10443");
        assert_eq!(domoticz.idx, 23);

        let influx = config.influx.unwrap();
        assert_eq!(influx.endpoint.base(), "http://influx.lan:8086");
        assert_eq!(influx.db, "smarthome");
        assert_eq!(influx.query_prefix, "water,type=usage value=");
        assert_eq!(influx.increment, 1.0);
        assert_eq!(influx.credentials, Some(("meter".into(), "hunter2".into())));

        assert_eq!(config.inactive_policy, InactivePolicy::TimeSeries);
        assert_eq!(config.debounce_scope, DebounceScope::AllEdges);
    }

    #[test]
    fn query_prefix_is_taken_verbatim() {
        let config = parse(&[("INFLUX_HOST", "db"), ("INFLUX_DB", "home"), ("INFLUX_QUERY_PREFIX", "gas,meter=main value=")]).unwrap();
        assert_eq!(config.influx.unwrap().query_prefix, "gas,meter=main value=");
    }

    #[test]
    fn missing_companion_keys_are_reported() {
        let err = parse(&[("DOMOTICZ_HOST", "localhost")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "DOMOTICZ_IDX", .. }));

        let err = parse(&[("INFLUX_HOST", "db"), ("INFLUX_DB", "home"), ("INFLUX_USER", "meter")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "INFLUX_PASSWORD", .. }));
    }

    #[test]
    fn bad_values_name_their_key() {
        let err = parse(&[("METER_MIN_DELAY_MS", "half a second")]).unwrap_err();
        assert_eq!(err.to_string(), "METER_MIN_DELAY_MS: cannot parse `half a second` as milliseconds");

        let err = parse(&[("METER_INACTIVE_POLICY", "mqtt")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "METER_INACTIVE_POLICY", .. }));

        let err = parse(&[("METER_ACTIVE_LOW", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "METER_ACTIVE_LOW", .. }));

        let err = parse(&[("DOMOTICZ_HOST", "x"), ("DOMOTICZ_IDX", "1"), ("DOMOTICZ_PROTOCOL", "ftp")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DOMOTICZ_PROTOCOL", .. }));

        let err = parse(&[("INFLUX_HOST", "db"), ("INFLUX_DB", "home"), ("INFLUX_INCREMENT", "NaN")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "INFLUX_INCREMENT", .. }));
    }

    #[test]
    fn zero_sampling_is_rejected() {
        let err = parse(&[("METER_SAMPLE_RATE_HZ", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Zero { key: "METER_SAMPLE_RATE_HZ" }));
        let err = parse(&[("METER_QUEUE_LEN", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Zero { key: "METER_QUEUE_LEN" }));
    }
}
