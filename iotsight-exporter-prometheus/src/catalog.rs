//! Static metric catalog model.
//!
//! Each source ships a `const` table of [`MetricDefinition`]s declaring every
//! exported metric: its exposition header data, the raw upstream fields it is
//! computed from with their static label overlays, and the normalization
//! strategy. The tables are immutable data, loaded once and shared freely.

use iotsight_common::MetricKind;

use crate::normalize::Normalize;

/// One raw upstream field feeding a metric, with its static label overlay.
///
/// Overlay order is declaration order and carries through to the rendered
/// label set unchanged.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    /// Raw field key in the upstream response.
    pub key: &'static str,

    /// Static labels distinguishing this field's samples (e.g. channel A/B).
    pub labels: &'static [(&'static str, &'static str)],
}

/// Immutable definition of one exported metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDefinition {
    /// Unique exposition metric name.
    pub name: &'static str,

    /// `# HELP` text.
    pub help: &'static str,

    /// Exposition type.
    pub kind: MetricKind,

    /// Optional `# UNIT` string.
    pub unit: Option<&'static str>,

    /// Raw fields this metric is computed from. Keys that do not resolve
    /// against the current upstream payload are skipped per-scrape.
    pub fields: &'static [FieldMapping],

    /// Normalization applied to each raw value.
    pub normalize: Normalize,
}

/// Definition of an info-style metric: a constant-1 sample whose labels are
/// taken verbatim from raw string fields of the upstream payload.
#[derive(Debug, Clone, Copy)]
pub struct InfoDefinition {
    /// Unique exposition metric name.
    pub name: &'static str,

    /// Raw fields exported as labels.
    pub fields: &'static [&'static str],
}

impl MetricDefinition {
    /// Iterate the raw field keys of this metric.
    pub fn field_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: MetricDefinition = MetricDefinition {
        name: "test_metric",
        help: "A test metric.",
        kind: MetricKind::Gauge,
        unit: Some("ratio"),
        fields: &[
            FieldMapping {
                key: "value_a",
                labels: &[("channel", "A")],
            },
            FieldMapping {
                key: "value_b",
                labels: &[("channel", "B")],
            },
        ],
        normalize: Normalize::Identity,
    };

    #[test]
    fn test_field_keys() {
        let keys: Vec<_> = FIXTURE.field_keys().collect();
        assert_eq!(keys, vec!["value_a", "value_b"]);
    }
}
