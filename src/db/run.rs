//! Ingestion run bookkeeping: one row per engine invocation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection};
use tracing::error;

use super::core::Database;
use crate::error::AppError;
use crate::record::SourceType;
use crate::TARGET_DB;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRun {
    pub id: i64,
    pub source_type: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records_fetched: i32,
    pub records_inserted: i32,
    pub records_updated: i32,
    pub error: Option<String>,
}

/// Open the run row. Called first inside the run transaction so the row is
/// only visible if the run commits.
pub async fn insert_run(
    conn: &mut PgConnection,
    source_type: SourceType,
    records_fetched: i64,
) -> Result<i64, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO ingestion_runs (source_type, started_at, records_fetched)
        VALUES ($1, now(), $2)
        RETURNING id
        "#,
    )
    .bind(source_type.as_str())
    .bind(records_fetched as i32)
    .fetch_one(conn)
    .await?;

    Ok(id)
}

pub async fn finalize_run(
    conn: &mut PgConnection,
    run_id: i64,
    inserted: i64,
    updated: i64,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE ingestion_runs
        SET finished_at = now(),
            records_inserted = $1,
            records_updated = $2,
            error = $3
        WHERE id = $4
        "#,
    )
    .bind(inserted as i32)
    .bind(updated as i32)
    .bind(error)
    .bind(run_id)
    .execute(conn)
    .await?;

    Ok(())
}

impl Database {
    /// Best-effort stamp after a rolled-back run. When the run row itself
    /// rolled back with the transaction this touches zero rows; if the
    /// write fails only the in-memory error counter moves.
    pub async fn mark_run_failed(&self, run_id: i64, message: &str) {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_runs
            SET finished_at = now(), error = $1
            WHERE id = $2
            "#,
        )
        .bind(message)
        .bind(run_id)
        .execute(self.pool())
        .await;

        if let Err(err) = result {
            error!(target: TARGET_DB, "Failed to stamp failed run {}: {}", run_id, err);
        }
    }

    pub async fn run_history(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<IngestionRun>, i64), AppError> {
        const SQL: &str = r#"
            SELECT id, source_type, started_at, finished_at,
                   records_fetched, records_inserted, records_updated, error
            FROM ingestion_runs
            ORDER BY started_at DESC
            LIMIT $1 OFFSET $2
        "#;

        let rows = self
            .with_retry(SQL, || {
                sqlx::query_as::<_, IngestionRun>(SQL)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool())
            })
            .await?;

        const COUNT_SQL: &str = "SELECT COUNT(*) FROM ingestion_runs";
        let total: i64 = self
            .with_retry(COUNT_SQL, || {
                sqlx::query_scalar(COUNT_SQL).fetch_one(self.pool())
            })
            .await?;

        Ok((rows, total))
    }
}
