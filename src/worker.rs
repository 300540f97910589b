// Collection loop: capture -> persist -> sleep, until shutdown.
// A failed capture or a failed insert is logged and skipped; the next tick
// produces a fresh sample.

use crate::metrics_repo::MetricsRepo;
use crate::models::{Sample, format_timestamp};
use crate::sampler::SnapshotSource;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{Duration, interval};

/// Source, repo and shutdown for the collection loop.
pub struct WorkerDeps {
    pub source: Arc<dyn SnapshotSource>,
    pub metrics_repo: Arc<MetricsRepo>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

/// Collection timing and logging config.
pub struct WorkerConfig {
    pub collection_interval_secs: u64,
    /// How often to log collection stats (real seconds).
    pub stats_log_interval_secs: u64,
}

pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> tokio::task::JoinHandle<()> {
    spawn_with_interval(
        deps,
        Duration::from_secs(config.collection_interval_secs),
        Duration::from_secs(config.stats_log_interval_secs),
    )
}

/// Same as `spawn` with explicit durations (sub-second intervals in tests).
pub fn spawn_with_interval(
    deps: WorkerDeps,
    collection_interval: Duration,
    stats_log_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        source,
        metrics_repo,
        mut shutdown_rx,
    } = deps;

    tokio::spawn(async move {
        let mut tick = interval(collection_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_log_tick = interval(stats_log_interval);
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut samples_saved_total: u64 = 0;
        let mut capture_failures_total: u64 = 0;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let source = source.clone();
                    let captured = match tokio::task::spawn_blocking(move || source.capture()).await {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, operation = "capture", "capture task join failed");
                            capture_failures_total += 1;
                            continue;
                        }
                    };
                    let devices = match captured {
                        Ok(d) => d,
                        Err(e) => {
                            tracing::warn!(error = %e, operation = "capture", "device capture failed");
                            capture_failures_total += 1;
                            continue;
                        }
                    };

                    let sample = Sample {
                        captured_at: format_timestamp(Utc::now()),
                        devices,
                    };
                    match metrics_repo.append_sample(&sample).await {
                        Ok(_) => {
                            samples_saved_total += 1;
                            tracing::debug!(
                                operation = "append_sample",
                                devices = sample.devices.len(),
                                "sample collected"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, operation = "append_sample", "failed to persist sample");
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("collection loop shutting down");
                    break;
                }
                _ = stats_log_tick.tick() => {
                    tracing::info!(
                        samples_saved_total,
                        capture_failures_total,
                        "collection stats"
                    );
                }
            }
        }
    })
}
