// Batch driver: one delivery task per pending aggregation key, all joined before returning.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use super::{DeliveryClient, DeliveryError, DeliveryOutcome};
use crate::metrics_repo::MetricsRepo;
use crate::models::aggregation_key;

/// Totals for one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: u32,
    pub failed: u32,
    pub exhausted: u32,
}

/// Delivers every unsent aggregate whose key falls within `pending_days` of `now`.
/// Keys are deduplicated so one key never has two tasks in flight in the same call.
#[instrument(skip(repo, client), fields(operation = "deliver_pending"))]
pub async fn deliver_pending(
    repo: Arc<MetricsRepo>,
    client: Arc<DeliveryClient>,
    now: DateTime<Utc>,
    pending_days: u32,
) -> anyhow::Result<DeliveryReport> {
    let mut report = DeliveryReport::default();
    if client.is_offline() {
        return Ok(report);
    }

    let since = aggregation_key(now - Duration::days(pending_days as i64));
    let pending = repo.get_unsent_aggregates(&since).await?;

    let mut seen = HashSet::new();
    let mut tasks = JoinSet::new();
    for aggregate in pending {
        if !seen.insert(aggregate.aggregation_key.clone()) {
            continue;
        }
        let repo = repo.clone();
        let client = client.clone();
        tasks.spawn(async move {
            let result = client.deliver(&repo, &aggregate).await;
            if let Err(err @ DeliveryError::MaxRetries(_)) = &result
                && let Err(e) = repo
                    .mark_aggregate_failed(&aggregate.aggregation_key, &err.to_string())
                    .await
            {
                warn!(error = %e, aggregation_key = %aggregate.aggregation_key, "mark failed");
            }
            result
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(DeliveryOutcome::Delivered { .. })) => report.delivered += 1,
            // Unreachable while the early offline return above holds.
            Ok(Ok(DeliveryOutcome::Offline)) => {}
            Ok(Err(DeliveryError::MaxRetries(_))) => report.exhausted += 1,
            Ok(Err(DeliveryError::Storage(e))) => {
                warn!(error = %e, "delivery storage error");
                report.failed += 1;
            }
            Ok(Err(_)) => report.failed += 1,
            Err(e) => {
                warn!(error = %e, "delivery task join");
                report.failed += 1;
            }
        }
    }

    if report != DeliveryReport::default() {
        info!(
            delivered = report.delivered,
            failed = report.failed,
            exhausted = report.exhausted,
            "delivery sweep"
        );
    }
    Ok(report)
}
