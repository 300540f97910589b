// Raw readings: one sample = many devices, each with named metric values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single metric value. Numeric vs text is decided when the reading is built,
/// aggregation only ever looks at `Number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            MetricValue::Text(_) => None,
        }
    }

    /// NaN and infinities have no JSON form (serde_json writes them as `null`).
    pub fn is_storable(&self) -> bool {
        match self {
            MetricValue::Number(v) => v.is_finite(),
            MetricValue::Text(_) => true,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Number(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Number(v as f64)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

/// One device's readings at capture time. `device_id` is the stable key,
/// `name` is informational and may change between samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    pub device_id: String,
    pub name: String,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, MetricValue>,
}

impl DeviceReading {
    pub fn new(device_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
            metrics: BTreeMap::new(),
        }
    }

    /// Builder-style metric insert. Non-finite numbers are skipped, as if the
    /// metric were not reported.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        let value = value.into();
        if value.is_storable() {
            self.metrics.insert(key.into(), value);
        }
        self
    }

    /// Removes metrics that cannot be stored; returns how many were dropped.
    pub fn drop_non_finite(&mut self) -> usize {
        let before = self.metrics.len();
        self.metrics.retain(|_, v| v.is_storable());
        before - self.metrics.len()
    }
}

/// One raw collection event. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Capture time, `TIMESTAMP_FORMAT` (UTC).
    pub captured_at: String,
    pub devices: Vec<DeviceReading>,
}
