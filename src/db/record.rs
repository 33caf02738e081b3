//! Record table access. The in-transaction operations take the
//! transaction handle explicitly; only the read paths used by the query
//! surface go through the pool.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, Row};

use super::core::Database;
use crate::error::AppError;
use crate::record::{CanonicalRecord, SourceType};

/// The slice of a stored record the upsert routine needs to decide between
/// insert, update, and skip.
#[derive(Debug)]
pub struct ExistingRecord {
    pub id: i64,
    pub content_hash: String,
    pub last_source_type: String,
}

pub async fn find_by_source_key(
    conn: &mut PgConnection,
    source_key: &str,
) -> Result<Option<ExistingRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, content_hash, last_source_type
        FROM records
        WHERE source_key = $1
        "#,
    )
    .bind(source_key)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|row| ExistingRecord {
        id: row.get("id"),
        content_hash: row.get("content_hash"),
        last_source_type: row.get("last_source_type"),
    }))
}

pub async fn insert(
    conn: &mut PgConnection,
    record: &CanonicalRecord,
    content_hash: &str,
    source_type: SourceType,
) -> Result<i64, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO records (
            source_key, published_at, title, entity_name_raw, entity_name_norm,
            region, record_id, status, document_url, raw_json,
            content_hash, last_source_type
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING id
        "#,
    )
    .bind(&record.source_key)
    .bind(&record.published_at)
    .bind(&record.title)
    .bind(&record.entity_name_raw)
    .bind(&record.entity_name_norm)
    .bind(&record.region)
    .bind(&record.record_id)
    .bind(&record.status)
    .bind(&record.document_url)
    .bind(&record.raw_json)
    .bind(content_hash)
    .bind(source_type.as_str())
    .fetch_one(conn)
    .await?;

    Ok(id)
}

/// Rewrite every canonical field; called only when the content hash moved.
pub async fn update(
    conn: &mut PgConnection,
    id: i64,
    record: &CanonicalRecord,
    content_hash: &str,
    source_type: SourceType,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE records SET
            published_at = $1,
            title = $2,
            entity_name_raw = $3,
            entity_name_norm = $4,
            region = $5,
            record_id = $6,
            status = $7,
            document_url = $8,
            raw_json = $9,
            content_hash = $10,
            last_source_type = $11,
            updated_at = now()
        WHERE id = $12
        "#,
    )
    .bind(&record.published_at)
    .bind(&record.title)
    .bind(&record.entity_name_raw)
    .bind(&record.entity_name_norm)
    .bind(&record.region)
    .bind(&record.record_id)
    .bind(&record.status)
    .bind(&record.document_url)
    .bind(&record.raw_json)
    .bind(content_hash)
    .bind(source_type.as_str())
    .bind(id)
    .execute(conn)
    .await?;

    Ok(())
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecordRow {
    pub id: i64,
    pub source_key: String,
    pub published_at: String,
    pub title: String,
    pub entity_name_raw: String,
    pub entity_name_norm: String,
    pub region: String,
    pub record_id: String,
    pub status: String,
    pub document_url: Option<String>,
    pub content_hash: String,
    pub last_source_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct RecordFilter {
    pub region: Option<String>,
    pub entity_name_norm: Option<String>,
}

impl Database {
    /// Filtered, paginated listing for the records endpoint and the CSV
    /// export. Null filters are wildcards, matching the alert-rule
    /// semantics.
    pub async fn list_records(
        &self,
        filter: &RecordFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RecordRow>, i64), AppError> {
        const SQL: &str = r#"
            SELECT id, source_key, published_at, title, entity_name_raw,
                   entity_name_norm, region, record_id, status, document_url,
                   content_hash, last_source_type, created_at, updated_at
            FROM records
            WHERE ($1::text IS NULL OR region = $1)
              AND ($2::text IS NULL OR entity_name_norm = $2)
            ORDER BY published_at DESC
            LIMIT $3 OFFSET $4
        "#;

        let rows = self
            .with_retry(SQL, || {
                sqlx::query_as::<_, RecordRow>(SQL)
                    .bind(&filter.region)
                    .bind(&filter.entity_name_norm)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool())
            })
            .await?;

        const COUNT_SQL: &str = r#"
            SELECT COUNT(*) FROM records
            WHERE ($1::text IS NULL OR region = $1)
              AND ($2::text IS NULL OR entity_name_norm = $2)
        "#;
        let total: i64 = self
            .with_retry(COUNT_SQL, || {
                sqlx::query_scalar(COUNT_SQL)
                    .bind(&filter.region)
                    .bind(&filter.entity_name_norm)
                    .fetch_one(self.pool())
            })
            .await?;

        Ok((rows, total))
    }
}
