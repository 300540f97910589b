// SQLite persistence for the telemetry pipeline: raw samples, hourly aggregates,
// delivery attempt log. Payloads are stored as JSON text.
// Every public operation is a single statement or a single transaction; callers
// never hold locks across operations.

pub mod aggregation;
mod attempts;

use crate::models::{Aggregate, DeviceReading, DeviceSummary, Sample};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{instrument, warn};

pub struct MetricsRepo {
    pool: SqlitePool,
}

impl MetricsRepo {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                captured_at TEXT NOT NULL,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_samples_captured_at ON samples(captured_at)")
            .execute(&self.pool)
            .await?;

        aggregation::init_aggregate_tables(&self.pool).await?;
        attempts::init_attempts_table(&self.pool).await?;

        Ok(())
    }

    /// Closes the pool; pending connections are drained.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ----- Sample Store -----

    #[instrument(skip(self, sample), fields(repo = "metrics", operation = "append_sample", devices = sample.devices.len()))]
    pub async fn append_sample(&self, sample: &Sample) -> anyhow::Result<i64> {
        let mut devices = sample.devices.clone();
        let dropped: usize = devices.iter_mut().map(DeviceReading::drop_non_finite).sum();
        if dropped > 0 {
            warn!(dropped, captured_at = %sample.captured_at, "non-finite metric values dropped");
        }
        let data = serde_json::to_string(&devices)?;
        let r = sqlx::query("INSERT INTO samples (captured_at, data) VALUES ($1, $2)")
            .bind(&sample.captured_at)
            .bind(&data)
            .execute(&self.pool)
            .await?;
        Ok(r.last_insert_rowid())
    }

    /// Samples with `start <= captured_at <= end`, ascending.
    #[instrument(skip(self), fields(repo = "metrics", operation = "get_samples_in_range"))]
    pub async fn get_samples_in_range(&self, start: &str, end: &str) -> anyhow::Result<Vec<Sample>> {
        let rows = sqlx::query(
            "SELECT captured_at, data FROM samples
             WHERE captured_at BETWEEN $1 AND $2
             ORDER BY captured_at ASC, id ASC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(readable_rows(&rows, parse_sample_row))
    }

    /// Samples whose capture timestamp starts with `prefix` (already normalized), ascending.
    #[instrument(skip(self), fields(repo = "metrics", operation = "get_samples_matching"))]
    pub async fn get_samples_matching(&self, prefix: &str) -> anyhow::Result<Vec<Sample>> {
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let rows = sqlx::query(
            "SELECT captured_at, data FROM samples
             WHERE captured_at LIKE $1 ESCAPE '\\'
             ORDER BY captured_at ASC, id ASC",
        )
        .bind(format!("{}%", escaped))
        .fetch_all(&self.pool)
        .await?;

        Ok(readable_rows(&rows, parse_sample_row))
    }

    pub async fn earliest_sample_at(&self) -> anyhow::Result<Option<String>> {
        let row = sqlx::query_scalar::<_, Option<String>>("SELECT MIN(captured_at) FROM samples")
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn count_samples(&self) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM samples")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Delete samples captured strictly before `cutoff`.
    #[instrument(skip(self), fields(repo = "metrics", operation = "purge_samples_before"))]
    pub async fn purge_samples_before(&self, cutoff: &str) -> anyhow::Result<u64> {
        let r = sqlx::query("DELETE FROM samples WHERE captured_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    // ----- Aggregate Store -----

    #[instrument(skip(self, devices), fields(repo = "metrics", operation = "save_aggregate", devices = devices.len()))]
    pub async fn save_aggregate(
        &self,
        aggregation_key: &str,
        devices: &[DeviceSummary],
    ) -> anyhow::Result<i64> {
        let data = serde_json::to_string(devices)?;
        let r = sqlx::query("INSERT INTO aggregates (aggregation_key, data) VALUES ($1, $2)")
            .bind(aggregation_key)
            .bind(&data)
            .execute(&self.pool)
            .await?;
        Ok(r.last_insert_rowid())
    }

    pub async fn aggregate_exists(&self, aggregation_key: &str) -> anyhow::Result<bool> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM aggregates WHERE aggregation_key = $1",
        )
        .bind(aggregation_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(n > 0)
    }

    pub async fn latest_aggregation_key(&self) -> anyhow::Result<Option<String>> {
        let row =
            sqlx::query_scalar::<_, Option<String>>("SELECT MAX(aggregation_key) FROM aggregates")
                .fetch_one(&self.pool)
                .await?;
        Ok(row)
    }

    pub async fn get_aggregate(&self, aggregation_key: &str) -> anyhow::Result<Option<Aggregate>> {
        let row = sqlx::query(
            "SELECT id, aggregation_key, data, sent, last_error FROM aggregates
             WHERE aggregation_key = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(aggregation_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_aggregate_row).transpose()
    }

    /// Unsent aggregates with key strictly after `since_key`, oldest first.
    #[instrument(skip(self), fields(repo = "metrics", operation = "get_unsent_aggregates"))]
    pub async fn get_unsent_aggregates(&self, since_key: &str) -> anyhow::Result<Vec<Aggregate>> {
        let rows = sqlx::query(
            "SELECT id, aggregation_key, data, sent, last_error FROM aggregates
             WHERE sent = 0 AND aggregation_key > $1
             ORDER BY aggregation_key ASC, id ASC",
        )
        .bind(since_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(readable_rows(&rows, parse_aggregate_row))
    }

    /// Record an error on a still-unsent aggregate without logging an attempt.
    pub async fn mark_aggregate_failed(
        &self,
        aggregation_key: &str,
        error: &str,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE aggregates SET last_error = $1 WHERE aggregation_key = $2 AND sent = 0")
            .bind(error)
            .bind(aggregation_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete aggregates keyed strictly before `cutoff_key` together with their attempts.
    /// Returns (aggregates_deleted, attempts_deleted).
    #[instrument(skip(self), fields(repo = "metrics", operation = "purge_aggregates_before"))]
    pub async fn purge_aggregates_before(&self, cutoff_key: &str) -> anyhow::Result<(u64, u64)> {
        let mut tx = self.pool.begin().await?;
        let aggregates = sqlx::query("DELETE FROM aggregates WHERE aggregation_key < $1")
            .bind(cutoff_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let attempts = sqlx::query("DELETE FROM delivery_attempts WHERE aggregation_key < $1")
            .bind(cutoff_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok((aggregates, attempts))
    }

    /// Reclaim space after deletes (run after retention sweeps).
    #[instrument(skip(self), fields(repo = "metrics", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

/// Decodes every row it can; undecodable rows are logged and skipped.
fn readable_rows<T>(
    rows: &[sqlx::sqlite::SqliteRow],
    parse: fn(&sqlx::sqlite::SqliteRow) -> anyhow::Result<T>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match parse(row) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "skipping unreadable row");
                None
            }
        })
        .collect()
}

fn parse_sample_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Sample> {
    let captured_at: String = row.try_get("captured_at")?;
    let data: String = row.try_get("data")?;
    let devices: Vec<DeviceReading> = serde_json::from_str(&data)
        .map_err(|e| anyhow::anyhow!("sample {} payload: {}", captured_at, e))?;
    Ok(Sample {
        captured_at,
        devices,
    })
}

fn parse_aggregate_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Aggregate> {
    let id: i64 = row.try_get("id")?;
    let aggregation_key: String = row.try_get("aggregation_key")?;
    let data: String = row.try_get("data")?;
    let sent: i64 = row.try_get("sent")?;
    let last_error: Option<String> = row.try_get("last_error")?;
    let devices: Vec<DeviceSummary> = serde_json::from_str(&data)
        .map_err(|e| anyhow::anyhow!("aggregate {} payload: {}", aggregation_key, e))?;
    Ok(Aggregate {
        id,
        aggregation_key,
        devices,
        sent: sent != 0,
        last_error,
    })
}
