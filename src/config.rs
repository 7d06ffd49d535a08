use log::info;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::errors::ConfigError;

const DEFAULT_BROKER: &str = "tcp://localhost:1883";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_CLIENT_ID: &str = "rf-weather-etl";
const DEFAULT_SAMPLE_TOPIC: &str = "weather/sample";
const DEFAULT_SUMMARY_TOPIC: &str = "weather/summary";
const DEFAULT_INPUT: &str = "-";
const DEFAULT_AVERAGE_INTERVAL_SECS: u64 = 300;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq)]
pub struct StationConfig {
    pub database_url: String,
    pub elevation_m: i32,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub sample_topic: String,
    pub summary_topic: String,
    pub input_path: String,
    pub average_interval: Duration,
    pub idle_timeout: Duration,
    pub flush_on_exit: bool,
}

impl StationConfig {
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();

        let config = Self::from_lookup(|key| env::var(key).ok())?;

        info!("Input: {}", config.input_path);
        info!("MQTT broker: {}:{}", config.mqtt_host, config.mqtt_port);
        info!(
            "Topics: samples -> {}, summaries -> {}",
            config.sample_topic, config.summary_topic
        );
        info!("Station elevation: {} m", config.elevation_m);
        info!(
            "Average interval: {} s, idle timeout: {} s",
            config.average_interval.as_secs(),
            config.idle_timeout.as_secs()
        );

        Ok(config)
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let or_default = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let database_url = required("DATABASE_URL")?;
        let elevation_m = parse_value("STATION_ELEVATION", &required("STATION_ELEVATION")?)?;

        let broker = or_default("MQTT_BROKER", DEFAULT_BROKER);
        let (mqtt_host, mqtt_port) = parse_broker(&broker)?;

        let average_interval = parse_interval(
            "AVERAGE_INTERVAL_SECS",
            lookup("AVERAGE_INTERVAL_SECS"),
            DEFAULT_AVERAGE_INTERVAL_SECS,
        )?;
        let idle_timeout = parse_interval(
            "IDLE_TIMEOUT_SECS",
            lookup("IDLE_TIMEOUT_SECS"),
            DEFAULT_IDLE_TIMEOUT_SECS,
        )?;

        let flush_on_exit = match lookup("FLUSH_ON_EXIT") {
            Some(value) => parse_value("FLUSH_ON_EXIT", &value.to_ascii_lowercase())?,
            None => false,
        };

        Ok(StationConfig {
            database_url,
            elevation_m,
            mqtt_host,
            mqtt_port,
            mqtt_client_id: or_default("MQTT_CLIENT_ID", DEFAULT_CLIENT_ID),
            sample_topic: or_default("SAMPLE_TOPIC", DEFAULT_SAMPLE_TOPIC),
            summary_topic: or_default("SUMMARY_TOPIC", DEFAULT_SUMMARY_TOPIC),
            input_path: or_default("INPUT_PATH", DEFAULT_INPUT),
            average_interval,
            idle_timeout,
            flush_on_exit,
        })
    }
}

fn parse_value<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_interval(
    name: &'static str,
    value: Option<String>,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    let secs = match value {
        Some(value) => parse_value::<u64>(name, &value)?,
        None => default_secs,
    };
    if secs == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: "0".into(),
            reason: "interval must be at least one second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

/// Split a `tcp://host:port` broker URL into host and port
fn parse_broker(broker: &str) -> Result<(String, u16), ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: "MQTT_BROKER",
        value: broker.to_string(),
        reason,
    };

    let url = Url::parse(broker).map_err(|e| invalid(e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| invalid("missing host".into()))?
        .to_string();
    Ok((host, url.port().unwrap_or(DEFAULT_MQTT_PORT)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<StationConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StationConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://wx@localhost/weather"),
        ("STATION_ELEVATION", "215"),
    ];

    #[test]
    fn defaults_apply() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.elevation_m, 215);
        assert_eq!(config.mqtt_host, "localhost");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.sample_topic, "weather/sample");
        assert_eq!(config.summary_topic, "weather/summary");
        assert_eq!(config.input_path, "-");
        assert_eq!(config.average_interval, Duration::from_secs(300));
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert!(!config.flush_on_exit);
    }

    #[test]
    fn missing_elevation_is_fatal() {
        assert_eq!(
            load(&REQUIRED[..1]),
            Err(ConfigError::Missing("STATION_ELEVATION"))
        );
        assert_eq!(
            load(&[("STATION_ELEVATION", "10")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("MQTT_BROKER", "tcp://broker.lan:8883"),
            ("AVERAGE_INTERVAL_SECS", "60"),
            ("IDLE_TIMEOUT_SECS", "120"),
            ("INPUT_PATH", "/dev/ttyUSB0"),
            ("FLUSH_ON_EXIT", "TRUE"),
        ]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.mqtt_host, "broker.lan");
        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.average_interval, Duration::from_secs(60));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.input_path, "/dev/ttyUSB0");
        assert!(config.flush_on_exit);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut bad_elevation = REQUIRED.to_vec();
        bad_elevation[1] = ("STATION_ELEVATION", "high");
        assert!(matches!(
            load(&bad_elevation),
            Err(ConfigError::Invalid {
                name: "STATION_ELEVATION",
                ..
            })
        ));

        let mut zero_interval = REQUIRED.to_vec();
        zero_interval.push(("AVERAGE_INTERVAL_SECS", "0"));
        assert!(load(&zero_interval).is_err());

        let mut bad_broker = REQUIRED.to_vec();
        bad_broker.push(("MQTT_BROKER", "not a url"));
        assert!(matches!(
            load(&bad_broker),
            Err(ConfigError::Invalid {
                name: "MQTT_BROKER",
                ..
            })
        ));
    }
}
