//! Collector contract and the shared catalog walk.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use iotsight_common::{ExpositionRecord, MetricFamily};

use crate::cache::RequestCounters;
use crate::catalog::MetricDefinition;

/// A per-source collector: produces the source's metric families for one
/// scrape. Failures are handled internally; one source's outage must never
/// prevent the other sources from rendering.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Source name used in logs and meta-metric naming.
    fn source(&self) -> &'static str;

    /// Assemble the exposition records for the current scrape.
    async fn collect(&self) -> Vec<MetricFamily>;
}

/// Walk a metric catalog against the current upstream payload.
///
/// For every raw field of every metric: look the field up via `lookup`
/// (absent fields are skipped at debug level, upstream schemas evolve),
/// apply the declared normalization, merge the static overlay labels with
/// `dynamic_labels`, and stamp the record with the upstream-reported
/// `timestamp_ms`. Families come back in catalog order, including empty ones
/// so their header lines still render.
pub fn walk_catalog(
    source: &str,
    catalog: &[MetricDefinition],
    lookup: &dyn Fn(&str) -> Option<f64>,
    dynamic_labels: &[(&str, String)],
    timestamp_ms: i64,
) -> Vec<MetricFamily> {
    let mut families = Vec::with_capacity(catalog.len());

    for metric in catalog {
        let mut family = MetricFamily::new(metric.name, metric.kind, metric.unit, Some(metric.help));

        for field in metric.fields {
            let Some(raw) = lookup(field.key) else {
                debug!(source, field = field.key, "Did not find a value");
                continue;
            };

            let value = match metric.normalize.apply(field.key, raw) {
                Ok(v) => v,
                Err(e) => {
                    error!(source, metric = metric.name, field = field.key, error = %e,
                        "Normalization failed, dropping sample");
                    continue;
                }
            };

            let mut labels: Vec<(String, String)> = field
                .labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            labels.extend(
                dynamic_labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone())),
            );

            family
                .records
                .push(ExpositionRecord::new(labels, value, timestamp_ms));
        }

        families.push(family);
    }

    families
}

/// Empty families for a catalog, used when a source has no payload this
/// scrape so the header comment lines still render.
pub fn empty_families(catalog: &[MetricDefinition]) -> Vec<MetricFamily> {
    catalog
        .iter()
        .map(|m| MetricFamily::new(m.name, m.kind, m.unit, Some(m.help)))
        .collect()
}

/// Merge families collected from multiple physical units (sensors) of the
/// same source, unioning records per metric name while keeping catalog order.
pub fn merge_families(into: &mut Vec<MetricFamily>, from: Vec<MetricFamily>) {
    for family in from {
        match into.iter_mut().find(|f| f.name == family.name) {
            Some(existing) => existing.records.extend(family.records),
            None => into.push(family),
        }
    }
}

/// Synthesize the per-source API request counter family.
pub fn meta_family(source: &str, counters: RequestCounters) -> MetricFamily {
    let mut family = MetricFamily::new(
        format!("{}_api_requests_total", source),
        iotsight_common::MetricKind::Counter,
        None,
        Some("Count of API requests made and skipped due to existing cache"),
    );
    family.records.push(ExpositionRecord::untimed(
        vec![("cache".to_string(), "hit".to_string())],
        counters.hit as f64,
    ));
    family.records.push(ExpositionRecord::untimed(
        vec![("cache".to_string(), "miss".to_string())],
        counters.miss as f64,
    ));
    family
}

/// Interpret a JSON value as a number. Numeric strings are accepted: some
/// upstreams report readings as quoted decimals.
pub fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Resolve a dotted path (`main.temp`) against a JSON object tree.
///
/// An absent segment yields `None`, never an error.
pub fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}
