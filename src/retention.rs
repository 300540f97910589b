// Retention sweep: raw samples and aggregates (with their attempt logs) past
// fixed horizons are deleted unconditionally. Aggregates past the horizon are
// dropped even when never delivered.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument};

use crate::metrics_repo::MetricsRepo;
use crate::models::{AGGREGATION_KEY_FORMAT, format_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub raw_days: u32,
    pub aggregate_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            raw_days: 30,
            aggregate_days: 365,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub samples_deleted: u64,
    pub aggregates_deleted: u64,
    pub attempts_deleted: u64,
}

#[instrument(skip(repo), fields(operation = "retention_sweep"))]
pub async fn sweep(
    repo: &MetricsRepo,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> anyhow::Result<SweepReport> {
    let raw_cutoff = format_timestamp(now - Duration::days(policy.raw_days as i64));
    let samples_deleted = repo.purge_samples_before(&raw_cutoff).await?;

    // Keys are compared against a cutoff rendered with the same hour-key width.
    let aggregate_cutoff = (now - Duration::days(policy.aggregate_days as i64))
        .format(AGGREGATION_KEY_FORMAT)
        .to_string();
    let (aggregates_deleted, attempts_deleted) =
        repo.purge_aggregates_before(&aggregate_cutoff).await?;

    let report = SweepReport {
        samples_deleted,
        aggregates_deleted,
        attempts_deleted,
    };
    if report != SweepReport::default() {
        info!(
            samples_deleted,
            aggregates_deleted, attempts_deleted, "retention sweep"
        );
    }
    Ok(report)
}
