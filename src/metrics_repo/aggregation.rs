// Hourly rollup: schema for the aggregates table + pure aggregation logic.
// DB access (save, query unsent, purge) stays in metrics_repo::mod.

use std::collections::{BTreeMap, HashMap};

use crate::models::{DeviceReading, DeviceSummary, Sample};
use sqlx::SqlitePool;

/// Creates the aggregates table and index if not present.
/// Uniqueness of aggregation_key is left to the aggregation driver.
pub async fn init_aggregate_tables(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aggregates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            aggregation_key TEXT NOT NULL,
            data TEXT NOT NULL,
            sent INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_aggregates_key_sent ON aggregates(aggregation_key, sent)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Reduces the samples of one window into per-device summaries.
///
/// Readings are grouped by `device_id` across samples, in first-seen order.
/// The display name comes from the last reading of the group; the numeric
/// metrics of the first reading decide which fields are summarized, and each
/// field is summarized over only the readings that carry it.
/// Empty input (or samples without devices) yields an empty vec.
pub fn aggregate_samples(samples: &[Sample]) -> Vec<DeviceSummary> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_id: HashMap<&str, Vec<&DeviceReading>> = HashMap::new();
    for s in samples {
        for reading in &s.devices {
            let id = reading.device_id.as_str();
            by_id
                .entry(id)
                .or_insert_with(|| {
                    order.push(id);
                    Vec::new()
                })
                .push(reading);
        }
    }

    order
        .into_iter()
        .filter_map(|id| by_id.get(id))
        .filter(|refs| !refs.is_empty())
        .map(|refs| aggregate_one_device(refs))
        .collect()
}

fn aggregate_one_device(refs: &[&DeviceReading]) -> DeviceSummary {
    let first = refs[0];
    let last = refs[refs.len() - 1];

    let mut stats = BTreeMap::new();
    let numeric_keys = first
        .metrics
        .iter()
        .filter(|(_, v)| v.as_number().is_some())
        .map(|(k, _)| k);

    for key in numeric_keys {
        let values: Vec<f64> = refs
            .iter()
            .filter_map(|r| r.metrics.get(key).and_then(|v| v.as_number()))
            .collect();
        let mean = mean_f64(&values);
        if values.is_empty() || !mean.is_finite() {
            continue;
        }
        stats.insert(format!("{}_mean", key), mean);
        stats.insert(
            format!("{}_min", key),
            values.iter().copied().fold(f64::INFINITY, f64::min),
        );
        stats.insert(
            format!("{}_max", key),
            values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        );
    }

    DeviceSummary {
        device_id: first.device_id.clone(),
        name: last.name.clone(),
        stats,
    }
}

fn mean_f64(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().sum::<f64>() / (v.len() as f64)
}
