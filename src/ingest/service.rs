//! The ingestion engine: content-addressed upserts with source precedence,
//! one transaction per run, and run accounting.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{Acquire, PgConnection};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::validate::validate_records;
use crate::db::alert::{self, ActionType};
use crate::db::record as record_table;
use crate::db::run as run_table;
use crate::db::Database;
use crate::error::{is_row_level, AppError};
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::record::{fingerprint, parse_published_at, CanonicalRecord, SourceType};
use crate::TARGET_INGEST;

/// The recent feed covers a rolling window; anything older than this (or
/// with an unparseable instant) is dropped before the run starts.
pub const RECENT_WINDOW_HOURS: i64 = 72;

const DEFAULT_BATCH_SIZE: usize = 100;
const FAILURE_SUMMARY_SAMPLES: usize = 3;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub validate: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            validate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub run_id: i64,
    pub source_type: SourceType,
    pub records_fetched: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_skipped: u64,
    pub records_failed: u64,
    pub processing_time_ms: u64,
}

enum UpsertOutcome {
    Inserted,
    Updated,
    Skipped,
}

/// A per-record failure that rolled back to its savepoint, or a failure
/// that poisons the whole run.
enum RowFailure {
    Row(sqlx::Error),
    Fatal(sqlx::Error),
}

pub struct IngestService {
    db: Database,
    metrics: Arc<IngestMetrics>,
}

impl IngestService {
    pub fn new(db: Database, metrics: Arc<IngestMetrics>) -> Self {
        IngestService { db, metrics }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Walk `records` in batches inside one transaction, upserting each and
    /// fanning out alerts for every inserted or content-changed row. A
    /// poisoned record is counted and skipped; a gateway failure rolls the
    /// whole run back.
    pub async fn ingest_records(
        &self,
        records: Vec<CanonicalRecord>,
        source_type: SourceType,
        options: &IngestOptions,
    ) -> Result<IngestSummary, AppError> {
        if records.is_empty() {
            return Err(AppError::Validation("no records to ingest".into()));
        }
        let batch_size = options.batch_size.max(1);
        let started = Instant::now();

        let records = match source_type {
            SourceType::Recent => filter_recent(records, Utc::now()),
            SourceType::Bulk => records,
        };
        let fetched = records.len() as u64;

        if options.validate {
            validate_records(&records)?;
        }

        info!(
            target: TARGET_INGEST,
            "Starting {} ingestion: {} record(s), batch size {}",
            source_type, fetched, batch_size
        );

        let mut tx = self.db.pool().begin().await.map_err(AppError::storage)?;
        let run_id = run_table::insert_run(&mut tx, source_type, fetched as i64)
            .await
            .map_err(AppError::storage)?;

        let mut inserted = 0u64;
        let mut updated = 0u64;
        let mut skipped = 0u64;
        let mut failed = 0u64;
        let mut failure_samples: Vec<String> = Vec::new();

        for (batch_index, batch) in records.chunks(batch_size).enumerate() {
            for record in batch {
                match upsert_record(&mut tx, record, source_type).await {
                    Ok(UpsertOutcome::Inserted) => inserted += 1,
                    Ok(UpsertOutcome::Updated) => updated += 1,
                    Ok(UpsertOutcome::Skipped) => skipped += 1,
                    Err(RowFailure::Row(err)) => {
                        failed += 1;
                        warn!(
                            target: TARGET_INGEST,
                            "Record {} failed: {}", record.source_key, err
                        );
                        if failure_samples.len() < FAILURE_SUMMARY_SAMPLES {
                            failure_samples.push(format!("{}: {}", record.source_key, err));
                        }
                    }
                    Err(RowFailure::Fatal(err)) => {
                        error!(
                            target: TARGET_INGEST,
                            "Run {} aborted at record {}: {}", run_id, record.source_key, err
                        );
                        drop(tx);
                        let message = format!("run aborted: {}", err);
                        self.db.mark_run_failed(run_id, &message).await;
                        self.metrics.record_failure();
                        return Err(AppError::storage(err));
                    }
                }
            }
            debug!(
                target: TARGET_INGEST,
                "Run {}: batch {} done ({} records)", run_id, batch_index, batch.len()
            );
        }

        let error_summary = if failed > 0 {
            Some(summarize_failures(failed, &failure_samples))
        } else {
            None
        };
        run_table::finalize_run(
            &mut tx,
            run_id,
            inserted as i64,
            updated as i64,
            error_summary.as_deref(),
        )
        .await
        .map_err(AppError::storage)?;
        tx.commit().await.map_err(AppError::storage)?;

        let processing_time_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_run(fetched, failed, processing_time_ms);

        info!(
            target: TARGET_INGEST,
            "Run {} complete: {} fetched, {} inserted, {} updated, {} skipped, {} failed in {}ms",
            run_id, fetched, inserted, updated, skipped, failed, processing_time_ms
        );

        Ok(IngestSummary {
            run_id,
            source_type,
            records_fetched: fetched,
            records_inserted: inserted,
            records_updated: updated,
            records_skipped: skipped,
            records_failed: failed,
            processing_time_ms,
        })
    }
}

/// Insert-if-absent, update-if-changed, skip-if-identical, gated by source
/// precedence: a row last written by bulk is never clobbered by the recent
/// feed. Runs under a savepoint so a database-level reject only poisons
/// this record.
async fn upsert_record(
    conn: &mut PgConnection,
    record: &CanonicalRecord,
    source_type: SourceType,
) -> Result<UpsertOutcome, RowFailure> {
    let mut savepoint = conn.begin().await.map_err(RowFailure::Fatal)?;

    match apply_record(&mut savepoint, record, source_type).await {
        Ok(outcome) => {
            savepoint.commit().await.map_err(RowFailure::Fatal)?;
            Ok(outcome)
        }
        Err(err) if is_row_level(&err) => {
            savepoint.rollback().await.map_err(RowFailure::Fatal)?;
            Err(RowFailure::Row(err))
        }
        Err(err) => Err(RowFailure::Fatal(err)),
    }
}

async fn apply_record(
    conn: &mut PgConnection,
    record: &CanonicalRecord,
    source_type: SourceType,
) -> Result<UpsertOutcome, sqlx::Error> {
    let hash = fingerprint(record);

    match record_table::find_by_source_key(conn, &record.source_key).await? {
        None => {
            let id = record_table::insert(conn, record, &hash, source_type).await?;
            alert::fan_out(conn, id, ActionType::Insert).await?;
            Ok(UpsertOutcome::Inserted)
        }
        Some(existing) => {
            // Bulk is the master of record.
            if source_type == SourceType::Recent
                && existing.last_source_type == SourceType::Bulk.as_str()
            {
                debug!(
                    target: TARGET_INGEST,
                    "Skipping {}: bulk-owned row, recent source", record.source_key
                );
                return Ok(UpsertOutcome::Skipped);
            }
            if existing.content_hash != hash {
                record_table::update(conn, existing.id, record, &hash, source_type).await?;
                alert::fan_out(conn, existing.id, ActionType::Update).await?;
                Ok(UpsertOutcome::Updated)
            } else {
                Ok(UpsertOutcome::Skipped)
            }
        }
    }
}

/// Drop recent-feed records that fall outside the rolling window or carry
/// an instant we cannot parse.
fn filter_recent(records: Vec<CanonicalRecord>, now: DateTime<Utc>) -> Vec<CanonicalRecord> {
    let cutoff = now - Duration::hours(RECENT_WINDOW_HOURS);
    let before = records.len();
    let kept: Vec<CanonicalRecord> = records
        .into_iter()
        .filter(
            |record| matches!(parse_published_at(&record.published_at), Some(ts) if ts >= cutoff),
        )
        .collect();
    if kept.len() < before {
        info!(
            target: TARGET_INGEST,
            "Time filter dropped {} of {} recent record(s)",
            before - kept.len(),
            before
        );
    }
    kept
}

fn summarize_failures(failed: u64, samples: &[String]) -> String {
    if samples.is_empty() {
        return format!("{} record(s) failed", failed);
    }
    format!("{} record(s) failed: {}", failed, samples.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(source_key: &str, published_at: &str) -> CanonicalRecord {
        CanonicalRecord {
            source_key: source_key.into(),
            published_at: published_at.into(),
            title: "T".into(),
            entity_name_raw: "Acme".into(),
            entity_name_norm: "acme".into(),
            region: "TX".into(),
            record_id: "R1".into(),
            status: "open".into(),
            document_url: None,
            raw_json: json!({}),
        }
    }

    #[test]
    fn recent_filter_drops_old_and_unparseable() {
        let now = "2024-06-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let records = vec![
            record("keep", "2024-05-31T14:00:00Z"),  // 10h old
            record("too-old", "2024-05-27T20:00:00Z"), // 100h old
            record("garbage", "not-a-date"),
        ];

        let kept = filter_recent(records, now);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source_key, "keep");
    }

    #[test]
    fn recent_filter_keeps_exact_boundary() {
        let now = "2024-06-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let records = vec![record("edge", "2024-05-29T00:00:00Z")]; // exactly 72h
        assert_eq!(filter_recent(records, now).len(), 1);
    }

    #[test]
    fn default_options() {
        let options = IngestOptions::default();
        assert_eq!(options.batch_size, 100);
        assert!(options.validate);
    }

    #[test]
    fn failure_summary_includes_samples() {
        let summary = summarize_failures(2, &["TX-1: bad".into(), "TX-2: worse".into()]);
        assert!(summary.starts_with("2 record(s) failed"));
        assert!(summary.contains("TX-1"));
        assert!(summary.contains("TX-2"));

        assert_eq!(summarize_failures(1, &[]), "1 record(s) failed");
    }
}
