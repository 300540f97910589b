// Startup pass: sweep retention, roll any closed windows left from the last run,
// and retry pending deliveries before the periodic ticks start.

use crate::aggregation_worker::{AggregationWorkerConfig, run_cleanup, run_one_tick};
use crate::delivery::DeliveryClient;
use crate::metrics_repo::MetricsRepo;
use std::sync::Arc;
use tracing::info;

pub async fn run_backfill(
    repo: Arc<MetricsRepo>,
    client: Arc<DeliveryClient>,
    config: &AggregationWorkerConfig,
) -> anyhow::Result<()> {
    run_cleanup(&repo, &config.retention).await;
    let report = run_one_tick(&repo, &client, config).await?;
    info!(
        delivered = report.delivered,
        failed = report.failed,
        "backfill complete"
    );
    Ok(())
}
