//! Prometheus metrics exporter for home IoT sensor APIs.
//!
//! Polls third-party sensor and telemetry APIs (PurpleAir air-quality
//! sensors, the Beestat/ecobee thermostat cloud, OpenWeather), normalizes
//! their JSON payloads into a uniform metric model and serves the result in
//! the text exposition format on `GET /metrics`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  Upstream APIs  │────>│    Collectors    │────>│   HTTP Server   │
//! │  (HTTP + JSON)  │     │ (cache+normalize)│     │   (/metrics)    │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//! ```
//!
//! Each source owns a response cache with TTL-based freshness, stampede
//! protection and hit/miss accounting; a scrape walks the per-source metric
//! catalogs against the cached payloads and renders the result.
//!
//! # Usage
//!
//! Run the exporter binary with a configuration file:
//!
//! ```bash
//! iotsight-exporter-prometheus --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod cache;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod http;
pub mod normalize;
pub mod render;
pub mod sources;

pub use cache::{CacheSnapshot, RequestCounters, ResponseCache};
pub use catalog::{FieldMapping, InfoDefinition, MetricDefinition};
pub use collector::Collector;
pub use config::ExporterConfig;
pub use http::HttpServer;
pub use normalize::Normalize;
pub use render::render;
pub use sources::{beestat::Beestat, openweather::OpenWeather, purpleair::PurpleAir};
