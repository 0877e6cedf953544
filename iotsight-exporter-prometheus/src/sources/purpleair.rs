//! PurpleAir air-quality sensors.
//!
//! Multi-sensor source: every configured sensor index is polled and cached
//! independently. Metrics queries use the two-stage freshness check against
//! the upstream `data_time_stamp` marker; the slow-moving device/location
//! info uses a long fixed TTL.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use iotsight_common::{ExpositionRecord, MetricFamily, MetricKind, Result};

use crate::cache::{CacheSnapshot, ResponseCache};
use crate::catalog::{FieldMapping, InfoDefinition, MetricDefinition};
use crate::collector::{
    Collector, empty_families, json_number, merge_families, meta_family, walk_catalog,
};
use crate::config::PurpleAirConfig;
use crate::normalize::Normalize;
use crate::sources::get_json;

/// Info tables: raw string fields exported as labels on a constant-1 sample.
pub const INFO_METRICS: &[InfoDefinition] = &[
    InfoDefinition {
        name: "purpleair_device_info",
        fields: &["name", "model", "hardware", "firmware_version"],
    },
    InfoDefinition {
        name: "purpleair_location_info",
        fields: &["location_type", "longitude", "latitude", "altitude"],
    },
];

pub const METRICS: &[MetricDefinition] = &[
    MetricDefinition {
        name: "purpleair_confidence_ratio",
        help: "The average of confidence_manual and confidence_auto indicating how closely channel A and B pseudo averages match each other.",
        kind: MetricKind::Gauge,
        unit: Some("ratio"),
        fields: &[FieldMapping {
            key: "confidence",
            labels: &[],
        }],
        normalize: Normalize::Scale { factor: 0.01 },
    },
    MetricDefinition {
        name: "purpleair_humidity_ratio",
        help: "Relative humidity inside of the sensor housing.",
        kind: MetricKind::Gauge,
        unit: Some("ratio"),
        fields: &[
            FieldMapping {
                key: "humidity_a",
                labels: &[("channel", "A")],
            },
            FieldMapping {
                key: "humidity_b",
                labels: &[("channel", "B")],
            },
        ],
        // Raw value is on average 4% lower than ambient conditions
        normalize: Normalize::ClampedRatio {
            offset: 0.04,
            max: 1.0,
        },
    },
    MetricDefinition {
        name: "purpleair_temperature_fahrenheit",
        help: "Temperature inside of the sensor housing.",
        kind: MetricKind::Gauge,
        unit: Some("fahrenheit"),
        fields: &[
            FieldMapping {
                key: "temperature_a",
                labels: &[("channel", "A")],
            },
            FieldMapping {
                key: "temperature_b",
                labels: &[("channel", "B")],
            },
        ],
        // Raw value is on average 8°F higher than ambient conditions
        normalize: Normalize::Affine {
            scale: 1.0,
            offset: -8.0,
        },
    },
    MetricDefinition {
        name: "purpleair_pressure_millibars",
        help: "Current pressure in Millibars.",
        kind: MetricKind::Gauge,
        unit: Some("millibars"),
        fields: &[
            FieldMapping {
                key: "pressure_a",
                labels: &[("channel", "A")],
            },
            FieldMapping {
                key: "pressure_b",
                labels: &[("channel", "B")],
            },
        ],
        normalize: Normalize::Identity,
    },
    MetricDefinition {
        name: "purpleair_voc",
        help: "VOC concentration (IAQ) in Bosch static iaq units as per BME680 spec sheet, EXPERIMENTAL.",
        kind: MetricKind::Gauge,
        unit: None,
        fields: &[
            FieldMapping {
                key: "voc_a",
                labels: &[("channel", "A")],
            },
            FieldMapping {
                key: "voc_b",
                labels: &[("channel", "B")],
            },
        ],
        normalize: Normalize::Identity,
    },
    MetricDefinition {
        name: "purpleair_pm_aqi",
        help: "US EPA AQI based on PM2.5 / PM10 particulate concentrations",
        kind: MetricKind::Gauge,
        unit: None,
        fields: &[
            FieldMapping {
                key: "pm2.5_alt_a",
                labels: &[("channel", "A"), ("pm", "2.5")],
            },
            FieldMapping {
                key: "pm2.5_alt_b",
                labels: &[("channel", "B"), ("pm", "2.5")],
            },
            FieldMapping {
                key: "pm10.0_a",
                labels: &[("channel", "A"), ("pm", "10.0")],
            },
            FieldMapping {
                key: "pm10.0_b",
                labels: &[("channel", "B"), ("pm", "10.0")],
            },
        ],
        normalize: Normalize::Aqi,
    },
    MetricDefinition {
        name: "purpleair_pm_concentration_ug_per_m3",
        help: "Estimated mass concentration (µg/m³) of PM1 / PM2.5 / PM10 particulates with a diameter of fewer than 1 / 2.5 / 10 microns.",
        kind: MetricKind::Gauge,
        unit: Some("ug_per_m3"),
        fields: &[
            FieldMapping {
                key: "pm1.0_a",
                labels: &[("channel", "A"), ("pm", "1.0")],
            },
            FieldMapping {
                key: "pm1.0_b",
                labels: &[("channel", "B"), ("pm", "1.0")],
            },
            FieldMapping {
                key: "pm2.5_alt_a",
                labels: &[("channel", "A"), ("pm", "2.5")],
            },
            FieldMapping {
                key: "pm2.5_alt_b",
                labels: &[("channel", "B"), ("pm", "2.5")],
            },
            FieldMapping {
                key: "pm10.0_a",
                labels: &[("channel", "A"), ("pm", "10.0")],
            },
            FieldMapping {
                key: "pm10.0_b",
                labels: &[("channel", "B"), ("pm", "10.0")],
            },
        ],
        normalize: Normalize::Identity,
    },
    MetricDefinition {
        name: "purpleair_visual_range_meters",
        help: "Often referred to as visibility, visual range is the distance from the observer that a large dark object, e.g. a mountain top or large building, just disappears from view.",
        kind: MetricKind::Gauge,
        unit: Some("meters"),
        fields: &[
            FieldMapping {
                key: "0.3_um_count_a",
                labels: &[("channel", "A")],
            },
            FieldMapping {
                key: "0.3_um_count_b",
                labels: &[("channel", "B")],
            },
        ],
        normalize: Normalize::VisualRange,
    },
    MetricDefinition {
        name: "purpleair_light_scattering_deciviews",
        help: "A haze index related to light scattering and extinction that is approximately linearly related to human perception of the haze.",
        kind: MetricKind::Gauge,
        unit: Some("deciviews"),
        fields: &[
            FieldMapping {
                key: "0.3_um_count_a",
                labels: &[("channel", "A")],
            },
            FieldMapping {
                key: "0.3_um_count_b",
                labels: &[("channel", "B")],
            },
        ],
        normalize: Normalize::Deciview,
    },
    MetricDefinition {
        name: "purpleair_um_particles_per_100ml",
        help: "Count concentration (particles/100ml) of all particles greater than or equal to label µm in diameter.",
        kind: MetricKind::Gauge,
        unit: Some("particles_per_100ml"),
        fields: &[
            FieldMapping {
                key: "0.3_um_count_a",
                labels: &[("channel", "A"), ("um", "0.3")],
            },
            FieldMapping {
                key: "0.3_um_count_b",
                labels: &[("channel", "B"), ("um", "0.3")],
            },
            FieldMapping {
                key: "0.5_um_count_a",
                labels: &[("channel", "A"), ("um", "0.5")],
            },
            FieldMapping {
                key: "0.5_um_count_b",
                labels: &[("channel", "B"), ("um", "0.5")],
            },
            FieldMapping {
                key: "1.0_um_count_a",
                labels: &[("channel", "A"), ("um", "1.0")],
            },
            FieldMapping {
                key: "1.0_um_count_b",
                labels: &[("channel", "B"), ("um", "1.0")],
            },
            FieldMapping {
                key: "2.5_um_count_a",
                labels: &[("channel", "A"), ("um", "2.5")],
            },
            FieldMapping {
                key: "2.5_um_count_b",
                labels: &[("channel", "B"), ("um", "2.5")],
            },
            FieldMapping {
                key: "5.0_um_count_a",
                labels: &[("channel", "A"), ("um", "5.0")],
            },
            FieldMapping {
                key: "5.0_um_count_b",
                labels: &[("channel", "B"), ("um", "5.0")],
            },
            FieldMapping {
                key: "10.0_um_count_a",
                labels: &[("channel", "A"), ("um", "10.0")],
            },
            FieldMapping {
                key: "10.0_um_count_b",
                labels: &[("channel", "B"), ("um", "10.0")],
            },
        ],
        normalize: Normalize::Identity,
    },
    MetricDefinition {
        name: "purpleair_wifi_rssi",
        help: "The WiFi signal strength.",
        kind: MetricKind::Gauge,
        unit: Some("rssi"),
        fields: &[FieldMapping {
            key: "rssi",
            labels: &[],
        }],
        normalize: Normalize::Identity,
    },
    MetricDefinition {
        name: "purpleair_latency_seconds",
        help: "The time taken to send data to the PurpleAir servers.",
        kind: MetricKind::Gauge,
        unit: Some("seconds"),
        fields: &[FieldMapping {
            key: "pa_latency",
            labels: &[],
        }],
        normalize: Normalize::Scale { factor: 0.001 },
    },
    MetricDefinition {
        name: "purpleair_uptime_seconds",
        help: "The time since the firmware started as last reported by the sensor.",
        kind: MetricKind::Gauge,
        unit: Some("seconds"),
        fields: &[FieldMapping {
            key: "uptime",
            labels: &[],
        }],
        normalize: Normalize::Scale { factor: 60.0 },
    },
];

/// Info payloads change on the order of firmware updates.
const INFO_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// The field list requested for a metrics query, deduplicated across metrics
/// that share raw fields, in a deterministic order.
fn metric_query_fields() -> String {
    let fields: BTreeSet<&str> = METRICS.iter().flat_map(|m| m.field_keys()).collect();
    fields.into_iter().collect::<Vec<_>>().join(",")
}

/// The field list requested for an info query.
fn info_query_fields() -> String {
    let fields: BTreeSet<&str> = INFO_METRICS.iter().flat_map(|d| d.fields.iter().copied()).collect();
    fields.into_iter().collect::<Vec<_>>().join(",")
}

fn data_time_stamp(payload: &Value) -> Option<i64> {
    payload.get("data_time_stamp").and_then(Value::as_i64)
}

/// PurpleAir source client and collector.
pub struct PurpleAir {
    http: reqwest::Client,
    config: PurpleAirConfig,
    cache: ResponseCache,
}

impl PurpleAir {
    pub fn new(config: PurpleAirConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut api_key = reqwest::header::HeaderValue::from_str(&config.api_key)
            .map_err(|e| iotsight_common::Error::Config(format!("Invalid PurpleAir API key: {}", e)))?;
        api_key.set_sensitive(true);
        headers.insert("X-API-Key", api_key);

        let http = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            config,
            cache: ResponseCache::new(),
        })
    }

    /// Fetch-or-reuse the metrics payload for one sensor.
    async fn query_metrics(&self, sensor: u32) -> Result<CacheSnapshot> {
        let url = format!("{}/{}", self.config.api_endpoint, sensor);
        let fields = metric_query_fields();

        self.cache
            .fetch_with_probe(
                &format!("{}/metrics", sensor),
                Duration::from_secs(self.config.cache_ttl_secs),
                || async { get_json(&self.http, &url, &[("fields", "confidence")]).await },
                || async { get_json(&self.http, &url, &[("fields", fields.as_str())]).await },
                data_time_stamp,
            )
            .await
    }

    /// Fetch-or-reuse the info payload for one sensor.
    async fn query_info(&self, sensor: u32) -> Result<CacheSnapshot> {
        let url = format!("{}/{}", self.config.api_endpoint, sensor);
        let fields = info_query_fields();

        self.cache
            .fetch(&format!("{}/info", sensor), INFO_TTL, || async {
                get_json(&self.http, &url, &[("fields", fields.as_str())]).await
            })
            .await
    }
}

/// Metric families for one sensor's metrics payload.
fn sensor_families(sensor: u32, payload: &Value) -> Vec<MetricFamily> {
    let Some(readings) = payload.get("sensor") else {
        debug!(sensor, "Metrics payload has no sensor object");
        return empty_families(METRICS);
    };
    if payload.get("time_stamp").is_none() {
        debug!(sensor, "Metrics payload has no time_stamp");
        return empty_families(METRICS);
    }

    let timestamp_ms = data_time_stamp(payload).unwrap_or(0) * 1000;
    let lookup = |key: &str| readings.get(key).and_then(json_number);

    walk_catalog(
        "purpleair",
        METRICS,
        &lookup,
        &[("sensor", sensor.to_string())],
        timestamp_ms,
    )
}

/// Info records for one sensor's info payload.
fn info_families(sensor: u32, payload: &Value) -> Vec<MetricFamily> {
    let mut families: Vec<MetricFamily> = INFO_METRICS
        .iter()
        .map(|d| MetricFamily::new(d.name, MetricKind::Info, None, None))
        .collect();

    let Some(readings) = payload.get("sensor") else {
        debug!(sensor, "Info payload has no sensor object");
        return families;
    };
    if payload.get("time_stamp").is_none() {
        return families;
    }

    let timestamp_ms = data_time_stamp(payload).unwrap_or(0) * 1000;

    for (definition, family) in INFO_METRICS.iter().zip(families.iter_mut()) {
        let mut labels = vec![("sensor".to_string(), sensor.to_string())];
        for field in definition.fields {
            let Some(value) = readings.get(*field) else {
                debug!(sensor, field, "Did not find a value");
                continue;
            };
            labels.push(((*field).to_string(), label_string(value)));
        }
        family
            .records
            .push(ExpositionRecord::new(labels, 1.0, timestamp_ms));
    }

    families
}

/// Render a JSON scalar the way it appears as a label value.
fn label_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Collector for PurpleAir {
    fn source(&self) -> &'static str {
        "purpleair"
    }

    async fn collect(&self) -> Vec<MetricFamily> {
        let mut info = Vec::new();
        let mut metrics = Vec::new();

        for &sensor in &self.config.sensor_ids {
            match self.query_info(sensor).await {
                Ok(snapshot) => merge_families(&mut info, info_families(sensor, &snapshot.payload)),
                Err(e) => {
                    warn!(sensor, error = %e, "Info collection failed");
                    merge_families(
                        &mut info,
                        INFO_METRICS
                            .iter()
                            .map(|d| MetricFamily::new(d.name, MetricKind::Info, None, None))
                            .collect(),
                    );
                }
            }

            match self.query_metrics(sensor).await {
                Ok(snapshot) => {
                    merge_families(&mut metrics, sensor_families(sensor, &snapshot.payload))
                }
                Err(e) => {
                    warn!(sensor, error = %e, "Metrics collection failed");
                    merge_families(&mut metrics, empty_families(METRICS));
                }
            }
        }

        // Info families first, then the metric families, then the meta
        // counters, matching the exposition layout scrapers already consume.
        let mut families = info;
        families.append(&mut metrics);
        families.push(meta_family("purpleair", self.cache.counters()));
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metrics_payload() -> Value {
        json!({
            "time_stamp": 1700000100,
            "data_time_stamp": 1700000000,
            "sensor": {
                "confidence": 96,
                "humidity_a": 31,
                "temperature_a": 78.0,
                "pm2.5_alt_a": 12.0,
                "0.3_um_count_a": 0,
                "rssi": -62,
                "pa_latency": 250,
                "uptime": 30,
            }
        })
    }

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
        families.iter().find(|f| f.name == name).unwrap()
    }

    #[test]
    fn test_sensor_families_normalizes_and_labels() {
        let families = sensor_families(12345, &metrics_payload());
        assert_eq!(families.len(), METRICS.len());

        let humidity = family(&families, "purpleair_humidity_ratio");
        assert_eq!(humidity.records.len(), 1);
        assert!((humidity.records[0].value - 0.35).abs() < 1e-9);
        assert_eq!(
            humidity.records[0].labels,
            vec![
                ("channel".to_string(), "A".to_string()),
                ("sensor".to_string(), "12345".to_string()),
            ]
        );
        assert_eq!(humidity.records[0].timestamp_ms, Some(1_700_000_000_000));

        let temperature = family(&families, "purpleair_temperature_fahrenheit");
        assert_eq!(temperature.records[0].value, 70.0);

        let aqi = family(&families, "purpleair_pm_aqi");
        assert_eq!(aqi.records.len(), 1);
        assert_eq!(aqi.records[0].value, 50.0);

        let uptime = family(&families, "purpleair_uptime_seconds");
        assert_eq!(uptime.records[0].value, 1800.0);

        let latency = family(&families, "purpleair_latency_seconds");
        assert!((latency.records[0].value - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_sensor_families_shared_raw_field() {
        // 0.3_um_count_a feeds visual range, deciviews and particle counts
        let families = sensor_families(1, &metrics_payload());

        let visual = family(&families, "purpleair_visual_range_meters");
        assert!((visual.records[0].value - 390_000.0).abs() < 1e-6);

        let haze = family(&families, "purpleair_light_scattering_deciviews");
        assert!(haze.records[0].value.abs() < 1e-9);

        let counts = family(&families, "purpleair_um_particles_per_100ml");
        assert_eq!(counts.records.len(), 1);
        assert_eq!(
            counts.records[0].labels,
            vec![
                ("channel".to_string(), "A".to_string()),
                ("um".to_string(), "0.3".to_string()),
                ("sensor".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_sensor_families_invalid_payload() {
        let families = sensor_families(1, &json!({}));
        assert!(families.iter().all(|f| f.records.is_empty()));
        assert_eq!(families.len(), METRICS.len());
    }

    #[test]
    fn test_info_families() {
        let payload = json!({
            "time_stamp": 1700000100,
            "data_time_stamp": 1700000000,
            "sensor": {
                "name": "Backyard",
                "model": "PA-II",
                "hardware": "2.0+BME280+PMSX003-B+PMSX003-A",
                "firmware_version": "7.02",
                "location_type": 0,
                "latitude": 47.6,
                "longitude": -122.3,
                "altitude": 120,
            }
        });

        let families = info_families(12345, &payload);
        assert_eq!(families.len(), 2);

        let device = &families[0];
        assert_eq!(device.name, "purpleair_device_info");
        assert_eq!(device.kind, MetricKind::Info);
        assert_eq!(device.records[0].value, 1.0);
        assert_eq!(
            device.records[0].labels,
            vec![
                ("sensor".to_string(), "12345".to_string()),
                ("name".to_string(), "Backyard".to_string()),
                ("model".to_string(), "PA-II".to_string()),
                (
                    "hardware".to_string(),
                    "2.0+BME280+PMSX003-B+PMSX003-A".to_string()
                ),
                ("firmware_version".to_string(), "7.02".to_string()),
            ]
        );

        let location = &families[1];
        assert_eq!(location.records[0].labels[1].0, "location_type");
        assert_eq!(location.records[0].labels[1].1, "0");
    }

    #[test]
    fn test_query_field_lists() {
        let fields = metric_query_fields();
        assert!(fields.contains("pm2.5_alt_a"));
        assert!(fields.contains("confidence"));
        // Shared fields appear once
        assert_eq!(fields.matches("0.3_um_count_a").count(), 1);

        let info = info_query_fields();
        assert!(info.contains("firmware_version"));
        assert!(info.contains("latitude"));
    }
}
