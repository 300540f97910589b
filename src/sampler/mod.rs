// Sampling collaborator: one call returns a snapshot of per-device readings.

mod sysinfo_source;

pub use sysinfo_source::SysinfoSource;

use crate::models::DeviceReading;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Telemetry backend missing at startup; fatal.
    #[error("telemetry backend unavailable: {0}")]
    Unavailable(String),
    /// One capture failed; the caller logs and waits for the next interval.
    #[error("capture failed: {0}")]
    Capture(String),
}

/// Source of device snapshots. Implementations may block; the collection loop
/// calls `capture` on the blocking pool.
pub trait SnapshotSource: Send + Sync {
    fn capture(&self) -> Result<Vec<DeviceReading>, CaptureError>;
}
