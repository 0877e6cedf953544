//! Beestat (ecobee) thermostat cloud service.
//!
//! One upstream resource for the whole source: a single `read_id` call
//! returns every sensor attached to the account. Readings are matched by
//! capability type rather than flat field keys, so the catalog's field key is
//! the capability type to look for. The API reports no observation time, so
//! samples carry the cache commit time.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use iotsight_common::{ExpositionRecord, MetricFamily, MetricKind, Result};

use crate::cache::{CacheSnapshot, ResponseCache};
use crate::catalog::{FieldMapping, MetricDefinition};
use crate::collector::{Collector, empty_families, json_number, meta_family};
use crate::config::BeestatConfig;
use crate::normalize::Normalize;
use crate::sources::get_json;

pub const METRICS: &[MetricDefinition] = &[
    MetricDefinition {
        name: "ecobee_temperature_fahrenheit",
        help: "Temperature reported by ecobee sensor.",
        kind: MetricKind::Gauge,
        unit: Some("fahrenheit"),
        fields: &[FieldMapping {
            key: "temperature",
            labels: &[],
        }],
        // Reported in tenths of a degree
        normalize: Normalize::Scale { factor: 0.1 },
    },
    MetricDefinition {
        name: "ecobee_humidity_ratio",
        help: "Relative humidity reported by ecobee sensor.",
        kind: MetricKind::Gauge,
        unit: Some("ratio"),
        fields: &[FieldMapping {
            key: "humidity",
            labels: &[],
        }],
        normalize: Normalize::Scale { factor: 0.01 },
    },
];

const CACHE_KEY: &str = "beestat";

/// Beestat source client and collector.
pub struct Beestat {
    http: reqwest::Client,
    config: BeestatConfig,
    cache: ResponseCache,
}

impl Beestat {
    pub fn new(config: BeestatConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut cookie =
            reqwest::header::HeaderValue::from_str(&format!("session_key={}", config.session_key))
                .map_err(|e| {
                    iotsight_common::Error::Config(format!("Invalid beestat session key: {}", e))
                })?;
        cookie.set_sensitive(true);
        headers.insert(reqwest::header::COOKIE, cookie);

        let http = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            config,
            cache: ResponseCache::new(),
        })
    }

    /// Fetch-or-reuse the account's sensor payload.
    async fn query(&self) -> Result<CacheSnapshot> {
        self.cache
            .fetch(
                CACHE_KEY,
                Duration::from_secs(self.config.cache_ttl_secs),
                || async {
                    get_json(
                        &self.http,
                        &self.config.api_endpoint,
                        &[
                            ("api_key", self.config.api_key.as_str()),
                            ("resource", "ecobee_sensor"),
                            ("method", "read_id"),
                        ],
                    )
                    .await
                },
            )
            .await
    }
}

/// Metric families for the account payload.
fn families_from(payload: &Value, fetched_at_ms: i64) -> Vec<MetricFamily> {
    let valid = payload.get("success").and_then(Value::as_bool) == Some(true);
    let Some(sensors) = payload.get("data").and_then(Value::as_object).filter(|_| valid) else {
        debug!("API data from beestat.io is not valid");
        return empty_families(METRICS);
    };

    let mut families = empty_families(METRICS);

    for (metric, family) in METRICS.iter().zip(families.iter_mut()) {
        let capability_type = metric.fields[0].key;

        for sensor in sensors.values() {
            if sensor.get("in_use").and_then(Value::as_bool) != Some(true) {
                debug!("Skipping not in use sensor data");
                continue;
            }

            let Some(raw) = capability_value(sensor, capability_type) else {
                debug!(metric = metric.name, "Did not find a value");
                continue;
            };

            let value = match metric.normalize.apply(capability_type, raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!(metric = metric.name, error = %e, "Normalization failed");
                    continue;
                }
            };

            let labels = vec![
                (
                    "thermostat_id".to_string(),
                    scalar_string(sensor.get("ecobee_thermostat_id")),
                ),
                (
                    "sensor_id".to_string(),
                    scalar_string(sensor.get("ecobee_sensor_id")),
                ),
                ("name".to_string(), scalar_string(sensor.get("name"))),
            ];

            family
                .records
                .push(ExpositionRecord::new(labels, value, fetched_at_ms));
        }
    }

    families
}

/// Find the reading for a capability type on one sensor.
fn capability_value(sensor: &Value, capability_type: &str) -> Option<f64> {
    sensor
        .get("capability")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(capability_type))
        .and_then(|c| c.get("value"))
        .and_then(json_number)
}

fn scalar_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl Collector for Beestat {
    fn source(&self) -> &'static str {
        "beestat"
    }

    async fn collect(&self) -> Vec<MetricFamily> {
        let mut families = match self.query().await {
            Ok(snapshot) => families_from(&snapshot.payload, snapshot.fetched_at_ms),
            Err(e) => {
                warn!(error = %e, "Beestat collection failed");
                empty_families(METRICS)
            }
        };

        families.push(meta_family("ecobee", self.cache.counters()));
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "success": true,
            "data": {
                "101": {
                    "ecobee_thermostat_id": 7,
                    "ecobee_sensor_id": 101,
                    "name": "Living Room",
                    "in_use": true,
                    "capability": [
                        {"type": "temperature", "value": "724"},
                        {"type": "humidity", "value": "47"},
                        {"type": "occupancy", "value": "false"},
                    ],
                },
                "102": {
                    "ecobee_thermostat_id": 7,
                    "ecobee_sensor_id": 102,
                    "name": "Bedroom",
                    "in_use": false,
                    "capability": [
                        {"type": "temperature", "value": "698"},
                    ],
                },
            },
        })
    }

    #[test]
    fn test_families_from_payload() {
        let families = families_from(&payload(), 1_700_000_000_000);
        assert_eq!(families.len(), 2);

        let temperature = &families[0];
        assert_eq!(temperature.name, "ecobee_temperature_fahrenheit");
        // The not-in-use sensor is skipped
        assert_eq!(temperature.records.len(), 1);
        assert!((temperature.records[0].value - 72.4).abs() < 1e-9);
        assert_eq!(
            temperature.records[0].labels,
            vec![
                ("thermostat_id".to_string(), "7".to_string()),
                ("sensor_id".to_string(), "101".to_string()),
                ("name".to_string(), "Living Room".to_string()),
            ]
        );
        assert_eq!(
            temperature.records[0].timestamp_ms,
            Some(1_700_000_000_000)
        );

        let humidity = &families[1];
        assert!((humidity.records[0].value - 0.47).abs() < 1e-9);
    }

    #[test]
    fn test_families_from_unsuccessful_payload() {
        let families = families_from(&json!({"success": false}), 0);
        assert!(families.iter().all(|f| f.records.is_empty()));
    }

    #[test]
    fn test_families_from_missing_capability() {
        let payload = json!({
            "success": true,
            "data": {
                "101": {
                    "ecobee_thermostat_id": 7,
                    "ecobee_sensor_id": 101,
                    "name": "Hall",
                    "in_use": true,
                    "capability": [
                        {"type": "occupancy", "value": "true"},
                    ],
                },
            },
        });

        let families = families_from(&payload, 0);
        assert!(families.iter().all(|f| f.records.is_empty()));
    }
}
