// Host devices via sysinfo: CPU, memory, and one device per temperature sensor.

use std::sync::Mutex;

use sysinfo::{Components, System};

use super::{CaptureError, SnapshotSource};
use crate::models::DeviceReading;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub struct SysinfoSource {
    sys: Mutex<System>,
}

impl SysinfoSource {
    /// Fails when no CPU is visible (nothing could ever be sampled).
    pub fn new() -> Result<Self, CaptureError> {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        sys.refresh_memory();
        if sys.cpus().is_empty() {
            return Err(CaptureError::Unavailable("no CPUs reported".into()));
        }
        Ok(Self {
            sys: Mutex::new(sys),
        })
    }
}

impl SnapshotSource for SysinfoSource {
    fn capture(&self) -> Result<Vec<DeviceReading>, CaptureError> {
        let mut sys = self
            .sys
            .lock()
            .map_err(|e| CaptureError::Capture(format!("sysinfo lock poisoned: {}", e)))?;
        sys.refresh_cpu_all();
        sys.refresh_memory();

        let mut devices = Vec::new();

        let cpus = sys.cpus();
        let brand = cpus
            .first()
            .map(|c| c.brand().trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Unknown CPU".into());
        let frequency = cpus.first().map(|c| c.frequency()).unwrap_or(0);
        devices.push(
            DeviceReading::new("cpu", brand)
                .with(
                    "usage_percent",
                    (sys.global_cpu_usage() as f64).clamp(0.0, 100.0),
                )
                .with("frequency_mhz", frequency)
                .with("logical_cores", cpus.len() as u64),
        );

        let total = sys.total_memory();
        let used = sys.used_memory();
        let usage_percent = if total > 0 {
            (used as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        devices.push(
            DeviceReading::new("memory", "System memory")
                .with("used_mb", used as f64 / BYTES_PER_MB)
                .with("total_mb", total as f64 / BYTES_PER_MB)
                .with("usage_percent", usage_percent)
                .with("swap_used_mb", sys.used_swap() as f64 / BYTES_PER_MB),
        );
        drop(sys);

        let components = Components::new_with_refreshed_list();
        for component in components.list() {
            let Some(temperature) = component.temperature() else {
                continue;
            };
            let label = component.label();
            let mut reading = DeviceReading::new(format!("sensor:{}", label), label)
                .with("temperature_celsius", temperature as f64);
            if let Some(critical) = component.critical() {
                reading = reading.with("critical_celsius", critical as f64);
            }
            devices.push(reading);
        }

        Ok(devices)
    }
}
