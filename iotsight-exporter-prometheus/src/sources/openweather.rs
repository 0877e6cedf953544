//! OpenWeather current-conditions service.
//!
//! Requires a dependent lookup: the configured ZIP code is resolved to
//! coordinates through the geocoding endpoint once per process lifetime (the
//! resolution is treated as static and never expires). Until the lookup
//! succeeds the source contributes nothing; a later scrape retries it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{error, warn};

use iotsight_common::{Error, MetricFamily, MetricKind, Result};

use crate::cache::{CacheSnapshot, ResponseCache};
use crate::catalog::{FieldMapping, MetricDefinition};
use crate::collector::{
    Collector, empty_families, json_number, lookup_path, meta_family, walk_catalog,
};
use crate::config::OpenWeatherConfig;
use crate::normalize::Normalize;
use crate::sources::get_json;

pub const METRICS: &[MetricDefinition] = &[
    MetricDefinition {
        name: "openweather_temperature_fahrenheit",
        help: "Current temperature.",
        kind: MetricKind::Gauge,
        unit: Some("fahrenheit"),
        fields: &[
            FieldMapping {
                key: "main.temp",
                labels: &[("type", "real")],
            },
            FieldMapping {
                key: "main.temp_min",
                labels: &[("type", "real_min")],
            },
            FieldMapping {
                key: "main.temp_max",
                labels: &[("type", "real_max")],
            },
            FieldMapping {
                key: "main.feels_like",
                labels: &[("type", "feel")],
            },
        ],
        // Reported in Kelvin
        normalize: Normalize::Affine {
            scale: 1.8,
            offset: -459.67,
        },
    },
    MetricDefinition {
        name: "openweather_humidity_ratio",
        help: "Relative humidity.",
        kind: MetricKind::Gauge,
        unit: Some("ratio"),
        fields: &[FieldMapping {
            key: "main.humidity",
            labels: &[],
        }],
        normalize: Normalize::Scale { factor: 0.01 },
    },
    MetricDefinition {
        name: "openweather_pressure_millibars",
        help: "Atmospheric pressure on the sea level.",
        kind: MetricKind::Gauge,
        unit: Some("millibars"),
        fields: &[FieldMapping {
            key: "main.pressure",
            labels: &[],
        }],
        normalize: Normalize::Identity,
    },
    MetricDefinition {
        name: "openweather_visual_range_meters",
        help: "Often referred to as visibility, capped at 10km.",
        kind: MetricKind::Gauge,
        unit: Some("meters"),
        fields: &[FieldMapping {
            key: "visibility",
            labels: &[],
        }],
        normalize: Normalize::Identity,
    },
    MetricDefinition {
        name: "openweather_wind_meters_per_second",
        help: "Wind speed.",
        kind: MetricKind::Gauge,
        unit: Some("meters_per_second"),
        fields: &[
            FieldMapping {
                key: "wind.speed",
                labels: &[("type", "speed")],
            },
            FieldMapping {
                key: "wind.gust",
                labels: &[("type", "gust")],
            },
        ],
        normalize: Normalize::Identity,
    },
    MetricDefinition {
        name: "openweather_cloud_ratio",
        help: "Cloudiness.",
        kind: MetricKind::Gauge,
        unit: Some("ratio"),
        fields: &[FieldMapping {
            key: "clouds.all",
            labels: &[],
        }],
        normalize: Normalize::Scale { factor: 0.01 },
    },
];

const CACHE_KEY: &str = "openweather";

/// A resolved geocoding response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
    pub name: String,
    #[serde(default)]
    pub zip: Option<String>,
}

/// OpenWeather source client and collector.
pub struct OpenWeather {
    http: reqwest::Client,
    config: OpenWeatherConfig,
    cache: ResponseCache,
    location: OnceCell<GeoLocation>,
}

impl OpenWeather {
    pub fn new(config: OpenWeatherConfig) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            config,
            cache: ResponseCache::new(),
            location: OnceCell::new(),
        })
    }

    /// Resolve the configured ZIP code to coordinates, once per process.
    async fn resolve_location(&self) -> Result<&GeoLocation> {
        self.location
            .get_or_try_init(|| async {
                let body = get_json(
                    &self.http,
                    &self.config.geo_endpoint,
                    &[
                        ("zip", self.config.zip.as_str()),
                        ("appid", self.config.api_key.as_str()),
                    ],
                )
                .await
                .map_err(|e| {
                    Error::GeoResolution(format!(
                        "could not geo locate the zip code {}: {}",
                        self.config.zip, e
                    ))
                })?;

                serde_json::from_value(body).map_err(|e| {
                    Error::GeoResolution(format!("unexpected geocoding response: {}", e))
                })
            })
            .await
    }

    /// Fetch-or-reuse the current-conditions payload.
    async fn query(&self) -> Result<(GeoLocation, CacheSnapshot)> {
        let location = self.resolve_location().await?.clone();

        let lat = location.lat.to_string();
        let lon = location.lon.to_string();

        let snapshot = self
            .cache
            .fetch(
                CACHE_KEY,
                Duration::from_secs(self.config.cache_ttl_secs),
                || async {
                    get_json(
                        &self.http,
                        &self.config.api_endpoint,
                        &[
                            ("lat", lat.as_str()),
                            ("lon", lon.as_str()),
                            ("appid", self.config.api_key.as_str()),
                        ],
                    )
                    .await
                },
            )
            .await?;

        Ok((location, snapshot))
    }
}

/// Metric families for the current-conditions payload.
fn families_from(payload: &Value, location: &GeoLocation, configured_zip: &str) -> Vec<MetricFamily> {
    let timestamp_ms = payload.get("dt").and_then(Value::as_i64).unwrap_or(0) * 1000;
    let zip = location.zip.clone().unwrap_or_else(|| configured_zip.to_string());
    let lookup = |key: &str| lookup_path(payload, key).and_then(json_number);

    walk_catalog(
        "openweather",
        METRICS,
        &lookup,
        &[("name", location.name.clone()), ("zip", zip)],
        timestamp_ms,
    )
}

#[async_trait]
impl Collector for OpenWeather {
    fn source(&self) -> &'static str {
        "openweather"
    }

    async fn collect(&self) -> Vec<MetricFamily> {
        let mut families = match self.query().await {
            Ok((location, snapshot)) => {
                families_from(&snapshot.payload, &location, &self.config.zip)
            }
            Err(e @ Error::GeoResolution(_)) => {
                // Without coordinates there is nothing to report on; the
                // other sources are unaffected.
                error!(error = %e, "OpenWeather collection aborted");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "OpenWeather collection failed");
                empty_families(METRICS)
            }
        };

        families.push(meta_family("openweather", self.cache.counters()));
        families
    }
}
