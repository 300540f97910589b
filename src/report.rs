// Read-only rendering for the reporting surface: delivery summaries and raw samples.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::models::{DeliverySummary, MetricValue, Sample, normalize_prefix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON records.
    #[default]
    Json,
    /// One CSV row per device reading.
    Csv,
}

/// Sample lookup prefix: the user's timestamp (normalized), or the current UTC hour.
pub fn collection_prefix(at: Option<&str>, now: DateTime<Utc>) -> String {
    match at {
        Some(at) if !at.trim().is_empty() => normalize_prefix(at),
        _ => now.format("%Y-%m-%dT%H").to_string(),
    }
}

pub fn render_summaries(summaries: &[DeliverySummary]) -> String {
    if summaries.is_empty() {
        return "No send attempts found\n".to_string();
    }
    let mut out = String::from(
        "Aggregation Time | Attempts | First Attempt | Last Attempt | Last Error | UID | Sent\n",
    );
    for s in summaries {
        let _ = writeln!(
            out,
            "{} | {} | {} | {} | {} | {} | {}",
            s.aggregation_key,
            s.attempts,
            s.first_attempt,
            s.last_attempt,
            s.last_error.as_deref().unwrap_or("-"),
            s.ack_id.as_deref().unwrap_or("-"),
            s.sent
        );
    }
    out
}

pub fn render_summary(s: &DeliverySummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Aggregation Time: {}", s.aggregation_key);
    let _ = writeln!(out, "Attempts: {}", s.attempts);
    let _ = writeln!(out, "First Attempt: {}", s.first_attempt);
    let _ = writeln!(out, "Last Attempt: {}", s.last_attempt);
    let _ = writeln!(out, "Last Error: {}", s.last_error.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "UID: {}", s.ack_id.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "Sent: {}", s.sent);
    out
}

pub fn render_samples(samples: &[Sample], format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(samples)?),
        OutputFormat::Csv => render_samples_csv(samples),
    }
}

/// Columns: timestamp, device_id, name, then every metric name seen (sorted).
fn render_samples_csv(samples: &[Sample]) -> anyhow::Result<String> {
    let metric_names: BTreeSet<&str> = samples
        .iter()
        .flat_map(|s| s.devices.iter())
        .flat_map(|d| d.metrics.keys().map(String::as_str))
        .collect();

    let mut wtr = csv::Writer::from_writer(Vec::new());
    let mut header = vec!["timestamp", "device_id", "name"];
    header.extend(metric_names.iter().copied());
    wtr.write_record(&header)?;

    for sample in samples {
        for device in &sample.devices {
            let mut row = vec![
                sample.captured_at.clone(),
                device.device_id.clone(),
                device.name.clone(),
            ];
            for name in &metric_names {
                row.push(match device.metrics.get(*name) {
                    Some(MetricValue::Number(v)) => v.to_string(),
                    Some(MetricValue::Text(t)) => t.clone(),
                    None => String::new(),
                });
            }
            wtr.write_record(&row)?;
        }
    }

    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("csv flush: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}
