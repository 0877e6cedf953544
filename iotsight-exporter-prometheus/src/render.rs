//! Exposition text renderer.
//!
//! This is the wire contract with the scraping system: per family a `# TYPE`
//! line, optional `# UNIT` and `# HELP` lines, the sample lines, then a blank
//! separator line; the stream ends with an `# EOF` marker. Sample values
//! render with six decimal places, also for the logically-integer request
//! counters, matching the format the scraper has always been served.

use std::fmt::Write;

use iotsight_common::{MetricFamily, format_labels};

/// Serialize the collected metric families into the exposition text.
pub fn render(families: &[MetricFamily]) -> String {
    let mut output = String::with_capacity(families.len() * 256);

    for family in families {
        writeln!(output, "# TYPE {} {}", family.name, family.kind).ok();
        if let Some(unit) = &family.unit {
            writeln!(output, "# UNIT {} {}", family.name, unit).ok();
        }
        if let Some(help) = &family.help {
            writeln!(output, "# HELP {} {}", family.name, help).ok();
        }

        for record in &family.records {
            match record.timestamp_ms {
                Some(ts) => writeln!(
                    output,
                    "{}{} {:.6} {}",
                    family.name,
                    format_labels(&record.labels),
                    record.value,
                    ts
                )
                .ok(),
                None => writeln!(
                    output,
                    "{}{} {:.6}",
                    family.name,
                    format_labels(&record.labels),
                    record.value
                )
                .ok(),
            };
        }

        output.push('\n');
    }

    output.push_str("# EOF\n");
    output
}
