// Delivery attempt log. Attempt numbers are assigned inside the INSERT itself
// (MAX + 1 over the key) so two writers cannot both claim the same number; the
// UNIQUE constraint rejects the loser if they ever do.

use sqlx::Row;
use sqlx::SqlitePool;
use tracing::instrument;

use super::MetricsRepo;
use crate::models::{DeliveryAttempt, DeliverySummary, NewDeliveryAttempt};

pub(super) async fn init_attempts_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            aggregation_key TEXT NOT NULL,
            attempted_at TEXT NOT NULL,
            attempt_number INTEGER NOT NULL,
            success INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            ack_id TEXT,
            params TEXT NOT NULL,
            UNIQUE (aggregation_key, attempt_number)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

impl MetricsRepo {
    /// Appends one attempt and, in the same transaction, updates the aggregate's
    /// status: sent + cleared error on success, `last_error` on failure.
    /// Returns the assigned attempt number.
    #[instrument(
        skip(self, attempt),
        fields(repo = "metrics", operation = "record_attempt", aggregation_key = attempt.aggregation_key)
    )]
    pub async fn record_attempt(&self, attempt: &NewDeliveryAttempt<'_>) -> anyhow::Result<u32> {
        let mut tx = self.pool.begin().await?;

        let attempt_number: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO delivery_attempts
                (aggregation_key, attempted_at, attempt_number, success, error, ack_id, params)
            SELECT $1, $2, COALESCE(MAX(attempt_number), 0) + 1, $3, $4, $5, $6
            FROM delivery_attempts WHERE aggregation_key = $7
            RETURNING attempt_number
            "#,
        )
        .bind(attempt.aggregation_key)
        .bind(&attempt.attempted_at)
        .bind(attempt.success as i64)
        .bind(attempt.error.as_deref())
        .bind(attempt.ack_id.as_deref())
        .bind(attempt.params)
        .bind(attempt.aggregation_key)
        .fetch_one(&mut *tx)
        .await?;

        if attempt.success {
            sqlx::query(
                "UPDATE aggregates SET sent = 1, last_error = NULL WHERE aggregation_key = $1",
            )
            .bind(attempt.aggregation_key)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "UPDATE aggregates SET last_error = $1 WHERE aggregation_key = $2 AND sent = 0",
            )
            .bind(attempt.error.as_deref())
            .bind(attempt.aggregation_key)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(attempt_number as u32)
    }

    pub async fn count_attempts(&self, aggregation_key: &str) -> anyhow::Result<u32> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM delivery_attempts WHERE aggregation_key = $1",
        )
        .bind(aggregation_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(n as u32)
    }

    /// All attempts for a key, in attempt order.
    pub async fn get_attempts(&self, aggregation_key: &str) -> anyhow::Result<Vec<DeliveryAttempt>> {
        let rows = sqlx::query(
            "SELECT aggregation_key, attempted_at, attempt_number, success, error, ack_id, params
             FROM delivery_attempts WHERE aggregation_key = $1
             ORDER BY attempt_number ASC",
        )
        .bind(aggregation_key)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let attempt_number: i64 = row.try_get("attempt_number")?;
            let success: i64 = row.try_get("success")?;
            out.push(DeliveryAttempt {
                aggregation_key: row.try_get("aggregation_key")?,
                attempted_at: row.try_get("attempted_at")?,
                attempt_number: attempt_number as u32,
                success: success != 0,
                error: row.try_get("error")?,
                ack_id: row.try_get("ack_id")?,
                params: row.try_get("params")?,
            });
        }
        Ok(out)
    }

    /// One summary row per key with attempts, newest key first.
    #[instrument(skip(self), fields(repo = "metrics", operation = "get_delivery_summaries"))]
    pub async fn get_delivery_summaries(&self) -> anyhow::Result<Vec<DeliverySummary>> {
        let rows = sqlx::query(&summary_query("", "ORDER BY d.aggregation_key DESC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_summary_row).collect()
    }

    pub async fn get_delivery_summary(
        &self,
        aggregation_key: &str,
    ) -> anyhow::Result<Option<DeliverySummary>> {
        let row = sqlx::query(&summary_query("WHERE d.aggregation_key = $1", ""))
            .bind(aggregation_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_summary_row).transpose()
    }
}

fn summary_query(filter: &str, order: &str) -> String {
    format!(
        r#"
        SELECT
            d.aggregation_key AS aggregation_key,
            COUNT(*) AS attempts,
            MIN(d.attempted_at) AS first_attempt,
            MAX(d.attempted_at) AS last_attempt,
            (SELECT f.error FROM delivery_attempts f
              WHERE f.aggregation_key = d.aggregation_key AND f.success = 0
              ORDER BY f.attempt_number DESC LIMIT 1) AS last_error,
            MAX(CASE WHEN d.success = 1 THEN d.ack_id END) AS ack_id,
            MAX(d.success) AS sent
        FROM delivery_attempts d
        {filter}
        GROUP BY d.aggregation_key
        {order}
        "#
    )
}

fn parse_summary_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<DeliverySummary> {
    let attempts: i64 = row.try_get("attempts")?;
    let sent: i64 = row.try_get("sent")?;
    Ok(DeliverySummary {
        aggregation_key: row.try_get("aggregation_key")?,
        attempts: attempts as u32,
        first_attempt: row.try_get("first_attempt")?,
        last_attempt: row.try_get("last_attempt")?,
        last_error: row.try_get("last_error")?,
        ack_id: row.try_get("ack_id")?,
        sent: sent != 0,
    })
}
