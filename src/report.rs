//! Run summary: table output and JSON metrics file.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use sensor_kafka_producer::{FlushReport, OutcomeName};
use serde::{Deserialize, Serialize};

use crate::stats::StatsSnapshot;

/// Everything worth keeping about one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Wall clock duration in milliseconds
    pub duration_ms: u64,
    pub topic: String,
    pub users: usize,
    pub dry_run: bool,
    pub outcomes: StatsSnapshot,
    /// Buffered messages abandoned when the shutdown flush timed out
    pub unresolved: u64,
    pub flush_timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_elapsed_ms: Option<u64>,
}

impl RunSummary {
    pub fn apply_flush(&mut self, report: &FlushReport) {
        self.unresolved = report.unresolved;
        self.flush_timed_out = report.timed_out;
        self.flush_elapsed_ms = Some(report.elapsed.as_millis() as u64);
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }

    /// Successful deliveries per second of wall clock.
    pub fn messages_per_second(&self) -> f64 {
        let secs = self.duration_secs();
        if secs > 0.0 {
            self.outcomes.produce_ok as f64 / secs
        } else {
            0.0
        }
    }
}

/// Format the summary as a table.
pub fn format_table(summary: &RunSummary) -> String {
    let mut output = String::new();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Outcome", "Count", "Share"]);

    let total = summary.outcomes.total();
    for name in OutcomeName::ALL {
        let count = summary.outcomes.count(name);
        let share = if total > 0 {
            format!("{:.2}%", count as f64 * 100.0 / total as f64)
        } else {
            "-".to_string()
        };
        let name_cell = if name.is_error() && count > 0 {
            Cell::new(name).fg(Color::Red)
        } else {
            Cell::new(name)
        };
        table.add_row(vec![name_cell, Cell::new(format_number(count)), Cell::new(share)]);
    }

    let unresolved_cell = if summary.unresolved > 0 {
        Cell::new("unresolved").fg(Color::Yellow)
    } else {
        Cell::new("unresolved")
    };
    table.add_row(vec![
        unresolved_cell,
        Cell::new(format_number(summary.unresolved)),
        Cell::new("-"),
    ]);
    table.add_row(vec![
        Cell::new("TOTAL").fg(Color::Cyan),
        Cell::new(format_number(total)),
        Cell::new(format!("{:.1} msgs/s", summary.messages_per_second())),
    ]);

    output.push_str(&table.to_string());
    output.push_str(&format!(
        "\nTopic: {}  Users: {}  Duration: {:.1}s{}\n",
        summary.topic,
        summary.users,
        summary.duration_secs(),
        if summary.dry_run { "  (dry run)" } else { "" }
    ));

    if let Some(latency) = summary.outcomes.latency {
        output.push_str(&format!(
            "Delivery latency: avg {:.2}ms  min {:.2}ms  max {:.2}ms  ({} samples)\n",
            latency.avg_ms,
            latency.min_ms,
            latency.max_ms,
            format_number(latency.samples)
        ));
    }
    output.push_str(&format!(
        "Delivered: {}\n",
        format_bytes(summary.outcomes.bytes)
    ));
    if summary.flush_timed_out {
        output.push_str(&format!(
            "Shutdown flush timed out; {} message(s) abandoned\n",
            format_number(summary.unresolved)
        ));
    }

    output
}

/// Write the summary as pretty-printed JSON.
pub fn write_json(summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    Ok(())
}

/// Format a number with thousands separators.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
