// Hourly aggregate: one row per aggregation key, per-device mean/min/max.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-device summary. `stats` holds `<metric>_mean`, `<metric>_min`, `<metric>_max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_id: String,
    pub name: String,
    #[serde(flatten)]
    pub stats: BTreeMap<String, f64>,
}

impl DeviceSummary {
    pub fn stat(&self, key: &str) -> Option<f64> {
        self.stats.get(key).copied()
    }
}

/// One stored aggregate row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub id: i64,
    pub aggregation_key: String,
    pub devices: Vec<DeviceSummary>,
    pub sent: bool,
    pub last_error: Option<String>,
}
