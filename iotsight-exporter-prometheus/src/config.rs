//! Configuration for the IoTSight exporter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use iotsight_common::LoggingConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] iotsight_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
///
/// Each source section is optional; an absent section disables that source.
/// Required settings within a present section fail fast at load time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// PurpleAir air-quality sensor settings.
    #[serde(default)]
    pub purpleair: Option<PurpleAirConfig>,

    /// Beestat (ecobee) thermostat settings.
    #[serde(default)]
    pub beestat: Option<BeestatConfig>,

    /// OpenWeather settings.
    #[serde(default)]
    pub openweather: Option<OpenWeatherConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (default: "0.0.0.0:9090").
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:9090".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// PurpleAir source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurpleAirConfig {
    /// Sensor API endpoint, e.g. "https://api.purpleair.com/v1/sensors".
    pub api_endpoint: String,

    /// API key sent as the `X-API-Key` header.
    pub api_key: String,

    /// Sensor indexes to poll.
    pub sensor_ids: Vec<u32>,

    /// Metrics response cache TTL in seconds (default: 120).
    #[serde(default = "default_purpleair_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_purpleair_ttl() -> u64 {
    120
}

/// Beestat source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeestatConfig {
    /// API endpoint, e.g. "https://api.beestat.io/".
    pub api_endpoint: String,

    /// API key sent as a query parameter.
    pub api_key: String,

    /// Session key sent as a cookie.
    pub session_key: String,

    /// Response cache TTL in seconds (default: 300).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

/// OpenWeather source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenWeatherConfig {
    /// Current-weather API endpoint.
    pub api_endpoint: String,

    /// Geocoding endpoint used to resolve the ZIP code once per process.
    pub geo_endpoint: String,

    /// API key sent as the `appid` query parameter.
    pub api_key: String,

    /// ZIP/postal code to resolve and report on.
    pub zip: String,

    /// Response cache TTL in seconds (default: 300).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl() -> u64 {
    300
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = iotsight_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = iotsight_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.server.listen
            )));
        }

        if self.purpleair.is_none() && self.beestat.is_none() && self.openweather.is_none() {
            return Err(ConfigError::Validation(
                "At least one source (purpleair, beestat, openweather) must be configured"
                    .to_string(),
            ));
        }

        if let Some(purpleair) = &self.purpleair {
            if purpleair.api_endpoint.is_empty() || purpleair.api_key.is_empty() {
                return Err(ConfigError::Validation(
                    "purpleair requires api_endpoint and api_key".to_string(),
                ));
            }
            if purpleair.sensor_ids.is_empty() {
                return Err(ConfigError::Validation(
                    "purpleair requires at least one sensor id".to_string(),
                ));
            }
            if purpleair.cache_ttl_secs == 0 {
                return Err(ConfigError::Validation(
                    "purpleair cache_ttl_secs must be > 0".to_string(),
                ));
            }
        }

        if let Some(beestat) = &self.beestat {
            if beestat.api_endpoint.is_empty()
                || beestat.api_key.is_empty()
                || beestat.session_key.is_empty()
            {
                return Err(ConfigError::Validation(
                    "beestat requires api_endpoint, api_key and session_key".to_string(),
                ));
            }
            if beestat.cache_ttl_secs == 0 {
                return Err(ConfigError::Validation(
                    "beestat cache_ttl_secs must be > 0".to_string(),
                ));
            }
        }

        if let Some(openweather) = &self.openweather {
            if openweather.api_endpoint.is_empty()
                || openweather.geo_endpoint.is_empty()
                || openweather.api_key.is_empty()
                || openweather.zip.is_empty()
            {
                return Err(ConfigError::Validation(
                    "openweather requires api_endpoint, geo_endpoint, api_key and zip".to_string(),
                ));
            }
            if openweather.cache_ttl_secs == 0 {
                return Err(ConfigError::Validation(
                    "openweather cache_ttl_secs must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> &'static str {
        r#"{
            server: { listen: "127.0.0.1:9091" },
            purpleair: {
                api_endpoint: "https://api.purpleair.com/v1/sensors",
                api_key: "PA-KEY",
                sensor_ids: [12345, 67890],
                cache_ttl_secs: 60,
            },
            beestat: {
                api_endpoint: "https://api.beestat.io/",
                api_key: "BS-KEY",
                session_key: "BS-SESSION",
            },
            openweather: {
                api_endpoint: "https://api.openweathermap.org/data/2.5/weather",
                geo_endpoint: "https://api.openweathermap.org/geo/1.0/zip",
                api_key: "OW-KEY",
                zip: "98101",
            },
            logging: { level: "debug" },
        }"#
    }

    #[test]
    fn test_parse_full_config() {
        let config = ExporterConfig::parse(full_config()).unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:9091");

        let purpleair = config.purpleair.unwrap();
        assert_eq!(purpleair.sensor_ids, vec![12345, 67890]);
        assert_eq!(purpleair.cache_ttl_secs, 60);

        let beestat = config.beestat.unwrap();
        assert_eq!(beestat.session_key, "BS-SESSION");
        assert_eq!(beestat.cache_ttl_secs, 300);

        let openweather = config.openweather.unwrap();
        assert_eq!(openweather.zip, "98101");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_no_sources_fails_validation() {
        let result = ExporterConfig::parse("{}");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("At least one source")
        );
    }

    #[test]
    fn test_missing_required_setting_fails_fast() {
        // api_key absent from the purpleair section
        let json = r#"{
            purpleair: {
                api_endpoint: "https://api.purpleair.com/v1/sensors",
                sensor_ids: [12345],
            },
        }"#;

        assert!(matches!(
            ExporterConfig::parse(json),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", full_config()).unwrap();

        let config = ExporterConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9091");
        assert!(config.purpleair.is_some());
    }

    #[test]
    fn test_load_from_missing_file() {
        assert!(matches!(
            ExporterConfig::load_from_file("/nonexistent/iotsight.json5"),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_empty_sensor_list_fails_validation() {
        let json = r#"{
            purpleair: {
                api_endpoint: "https://api.purpleair.com/v1/sensors",
                api_key: "PA-KEY",
                sensor_ids: [],
            },
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("at least one sensor id")
        );
    }

    #[test]
    fn test_invalid_listen_fails_validation() {
        let json = r#"{
            server: { listen: "not-an-address" },
            beestat: {
                api_endpoint: "https://api.beestat.io/",
                api_key: "k",
                session_key: "s",
            },
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_zero_ttl_fails_validation() {
        let json = r#"{
            beestat: {
                api_endpoint: "https://api.beestat.io/",
                api_key: "k",
                session_key: "s",
                cache_ttl_secs: 0,
            },
        }"#;

        assert!(ExporterConfig::parse(json).is_err());
    }
}
