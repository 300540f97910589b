// Background pipeline worker: roll closed hourly windows into aggregates,
// deliver pending aggregates, and run the retention sweep + VACUUM on a
// configurable schedule (cron expression or fixed interval).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::delivery::DeliveryClient;
use crate::delivery::batch::{DeliveryReport, deliver_pending};
use crate::metrics_repo::MetricsRepo;
use crate::metrics_repo::aggregation;
use crate::models::{aggregation_key, hour_start, parse_aggregation_key, parse_timestamp, window_bounds};
use crate::retention::{self, RetentionPolicy};
use tracing::{debug, info, instrument, warn};

/// Config for the pipeline worker.
#[derive(Debug, Clone)]
pub struct AggregationWorkerConfig {
    pub aggregation_interval_secs: u64,
    pub delivery_interval_secs: u64,
    /// Unsent aggregates older than this are no longer picked up by delivery.
    pub pending_days: u32,
    pub retention: RetentionPolicy,
    /// Optional cron expression for the retention sweep. Uses local time.
    pub cleanup_schedule: Option<String>,
    /// Sweep every N seconds when cleanup_schedule is not set.
    pub cleanup_interval_secs: u64,
}

/// Spawns the pipeline worker. Returns a join handle.
pub fn spawn(
    repo: Arc<MetricsRepo>,
    client: Arc<DeliveryClient>,
    config: AggregationWorkerConfig,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(repo, client, config, shutdown_rx).await;
    })
}

#[instrument(skip_all, fields(interval_secs = config.aggregation_interval_secs))]
async fn run(
    repo: Arc<MetricsRepo>,
    client: Arc<DeliveryClient>,
    config: AggregationWorkerConfig,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let mut agg_interval =
        tokio::time::interval(Duration::from_secs(config.aggregation_interval_secs));
    agg_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut delivery_interval =
        tokio::time::interval(Duration::from_secs(config.delivery_interval_secs));
    delivery_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (cleanup_tx, mut cleanup_rx) = tokio::sync::mpsc::channel::<()>(1);
    let scheduler = tokio::spawn(cleanup_scheduler(config.clone(), cleanup_tx));

    loop {
        tokio::select! {
            _ = agg_interval.tick() => {
                if let Err(e) = aggregate_closed_windows(&repo, Utc::now()).await {
                    warn!(error = %e, "aggregation tick failed");
                }
            }
            _ = delivery_interval.tick() => {
                if let Err(e) = deliver_pending(repo.clone(), client.clone(), Utc::now(), config.pending_days).await {
                    warn!(error = %e, "delivery sweep failed");
                }
            }
            _ = cleanup_rx.recv() => {
                run_cleanup(&repo, &config.retention).await;
            }
            _ = &mut shutdown_rx => {
                debug!("pipeline worker shutting down");
                break;
            }
        }
    }
    scheduler.abort();
}

/// Sends a message on `tx` at each sweep time (cron or fixed interval). Uses local time for cron.
async fn cleanup_scheduler(config: AggregationWorkerConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.cleanup_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid cleanup_schedule; retention sweep will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.cleanup_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// Retention sweep followed by VACUUM; failures are logged, never fatal.
pub async fn run_cleanup(repo: &MetricsRepo, policy: &RetentionPolicy) {
    match retention::sweep(repo, policy, Utc::now()).await {
        Ok(_) => {
            if let Err(e) = repo.vacuum().await {
                warn!(error = %e, "vacuum failed");
            } else {
                info!("cleanup complete");
            }
        }
        Err(e) => warn!(error = %e, "retention sweep failed"),
    }
}

/// Aggregates every closed hourly window after the latest stored aggregate
/// (or from the earliest stored sample). Empty windows and keys that already
/// have an aggregate are skipped. Returns the number of aggregates saved.
pub async fn aggregate_closed_windows(
    repo: &MetricsRepo,
    now: DateTime<Utc>,
) -> anyhow::Result<u32> {
    let Some(earliest) = repo
        .earliest_sample_at()
        .await?
        .as_deref()
        .and_then(parse_timestamp)
    else {
        return Ok(0);
    };

    let mut window = hour_start(earliest);
    if let Some(latest) = repo
        .latest_aggregation_key()
        .await?
        .as_deref()
        .and_then(parse_aggregation_key)
    {
        window = window.max(latest + chrono::Duration::hours(1));
    }

    let current_hour = hour_start(now);
    let mut saved: u32 = 0;
    while window < current_hour {
        let key = aggregation_key(window);
        let (start, end) = window_bounds(window);
        let samples = repo.get_samples_in_range(&start, &end).await?;
        let devices = aggregation::aggregate_samples(&samples);

        if !devices.is_empty() && !repo.aggregate_exists(&key).await? {
            repo.save_aggregate(&key, &devices).await?;
            saved += 1;
            debug!(
                aggregation_key = %key,
                samples = samples.len(),
                devices = devices.len(),
                "window aggregated"
            );
        }
        window += chrono::Duration::hours(1);
    }

    if saved > 0 {
        info!(aggregated_windows = saved, "raw -> hourly aggregation");
    }
    Ok(saved)
}

/// One aggregation + delivery pass. Used by the startup backfill.
pub async fn run_one_tick(
    repo: &Arc<MetricsRepo>,
    client: &Arc<DeliveryClient>,
    config: &AggregationWorkerConfig,
) -> anyhow::Result<DeliveryReport> {
    let now = Utc::now();
    aggregate_closed_windows(repo, now).await?;
    deliver_pending(repo.clone(), client.clone(), now, config.pending_days).await
}
