use std::time::{SystemTime, UNIX_EPOCH};

/// Exposition type of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
    Info,
}

impl MetricKind {
    /// Get the string used in `# TYPE` comment lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Info => "info",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully rendered sample: label set, value and optional sample timestamp.
///
/// Records are created fresh on every scrape and discarded once the HTTP
/// response has been written. Label order is the declaration order of the
/// catalog overlay followed by dynamic identifying labels, never sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpositionRecord {
    /// Ordered label key/value pairs (values unescaped).
    pub labels: Vec<(String, String)>,

    /// Sample value.
    pub value: f64,

    /// Upstream-reported observation time in epoch milliseconds.
    /// `None` for samples without a timestamp (meta counters).
    pub timestamp_ms: Option<i64>,
}

impl ExpositionRecord {
    /// Create a record with an observation timestamp.
    pub fn new(labels: Vec<(String, String)>, value: f64, timestamp_ms: i64) -> Self {
        Self {
            labels,
            value,
            timestamp_ms: Some(timestamp_ms),
        }
    }

    /// Create a record without a timestamp.
    pub fn untimed(labels: Vec<(String, String)>, value: f64) -> Self {
        Self {
            labels,
            value,
            timestamp_ms: None,
        }
    }
}

/// One metric family: the catalog header data plus the samples collected
/// during the current scrape. A family with no records still renders its
/// header comment lines.
#[derive(Debug, Clone)]
pub struct MetricFamily {
    /// The full exposition metric name.
    pub name: String,

    /// Exposition type.
    pub kind: MetricKind,

    /// Optional `# UNIT` string.
    pub unit: Option<String>,

    /// Optional `# HELP` string.
    pub help: Option<String>,

    /// Samples collected during this scrape.
    pub records: Vec<ExpositionRecord>,
}

impl MetricFamily {
    /// Create an empty family.
    pub fn new(
        name: impl Into<String>,
        kind: MetricKind,
        unit: Option<&str>,
        help: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            unit: unit.map(str::to_string),
            help: help.map(str::to_string),
            records: Vec::new(),
        }
    }
}

/// Escape special characters in label values.
///
/// The exposition format requires exactly two escapes: backslash and double
/// quote. All other characters pass through untouched.
pub fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            _ => result.push(c),
        }
    }
    result
}

/// Format an ordered label set for the exposition format.
///
/// Preserves the given order; returns an empty string for an empty set.
pub fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        // Only backslash and quote are escaped
        assert_eq!(escape_label_value("line\nbreak"), "line\nbreak");
    }

    #[test]
    fn test_escape_label_value_mixed() {
        assert_eq!(escape_label_value("a\\b\"c"), "a\\\\b\\\"c");
    }

    #[test]
    fn test_format_labels_preserves_order() {
        let labels = vec![
            ("channel".to_string(), "A".to_string()),
            ("sensor".to_string(), "12345".to_string()),
            ("aa".to_string(), "z".to_string()),
        ];

        assert_eq!(
            format_labels(&labels),
            "{channel=\"A\",sensor=\"12345\",aa=\"z\"}"
        );
    }

    #[test]
    fn test_format_labels_empty() {
        assert_eq!(format_labels(&[]), "");
    }

    #[test]
    fn test_metric_kind_as_str() {
        assert_eq!(MetricKind::Gauge.as_str(), "gauge");
        assert_eq!(MetricKind::Counter.as_str(), "counter");
        assert_eq!(MetricKind::Info.as_str(), "info");
    }

    #[test]
    fn test_record_constructors() {
        let record = ExpositionRecord::new(vec![], 3.0, 1000);
        assert_eq!(record.timestamp_ms, Some(1000));

        let record = ExpositionRecord::untimed(vec![], 3.0);
        assert_eq!(record.timestamp_ms, None);
    }
}
