//! Connector for JSON array exports on local disk, the shape both the bulk
//! master dataset and the recent feed are delivered in.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::Connector;
use crate::error::AppError;
use crate::record::{normalize_entity_name, CanonicalRecord};
use crate::TARGET_INGEST;

pub struct JsonFileConnector {
    name: String,
    bulk_path: PathBuf,
    recent_path: PathBuf,
}

impl JsonFileConnector {
    pub fn new(
        name: impl Into<String>,
        bulk_path: impl Into<PathBuf>,
        recent_path: impl Into<PathBuf>,
    ) -> Self {
        JsonFileConnector {
            name: name.into(),
            bulk_path: bulk_path.into(),
            recent_path: recent_path.into(),
        }
    }

    async fn read_rows(&self, path: &Path) -> Result<Vec<CanonicalRecord>, AppError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|err| {
            AppError::Validation(format!("cannot read {}: {}", path.display(), err))
        })?;
        let rows: Vec<Value> = serde_json::from_str(&text).map_err(|err| {
            AppError::Validation(format!("{} is not a JSON array: {}", path.display(), err))
        })?;

        let records = map_rows(&rows);
        debug!(
            target: TARGET_INGEST,
            "{}: mapped {} of {} row(s) from {}",
            self.name,
            records.len(),
            rows.len(),
            path.display()
        );
        Ok(records)
    }
}

#[async_trait]
impl Connector for JsonFileConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_bulk(&self) -> Result<Vec<CanonicalRecord>, AppError> {
        self.read_rows(&self.bulk_path).await
    }

    async fn fetch_recent(&self, _hours: i64) -> Result<Vec<CanonicalRecord>, AppError> {
        self.read_rows(&self.recent_path).await
    }
}

/// Map source rows to canonical records. Rows without a source key are
/// unusable and skipped with a warning; everything else is passed through
/// as-is for the engine's validation to judge.
pub fn map_rows(rows: &[Value]) -> Vec<CanonicalRecord> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(source_key) = str_field(row, "source_key") else {
            warn!(target: TARGET_INGEST, "Skipping row without source_key");
            continue;
        };
        let entity_name_raw = str_field(row, "entity_name").unwrap_or_default();

        records.push(CanonicalRecord {
            source_key,
            published_at: str_field(row, "published_at").unwrap_or_default(),
            title: str_field(row, "title").unwrap_or_default(),
            entity_name_norm: normalize_entity_name(&entity_name_raw),
            entity_name_raw,
            region: str_field(row, "region").unwrap_or_default(),
            record_id: str_field(row, "record_id").unwrap_or_default(),
            status: str_field(row, "status").unwrap_or_default(),
            document_url: str_field(row, "document_url"),
            raw_json: row.clone(),
        });
    }
    records
}

fn str_field(row: &Value, key: &str) -> Option<String> {
    row.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn maps_fields_and_normalizes_entity_name() {
        let rows = vec![json!({
            "source_key": "TX-001",
            "published_at": "2024-01-10T00:00:00Z",
            "title": "Enforcement order",
            "entity_name": "  Acme Energy LLC ",
            "region": "TX",
            "record_id": "R1",
            "status": "open",
            "document_url": "https://example.com/doc.pdf",
            "docket": "extra-field-kept-in-raw-json"
        })];

        let records = map_rows(&rows);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.source_key, "TX-001");
        assert_eq!(record.entity_name_raw, "  Acme Energy LLC ");
        assert_eq!(record.entity_name_norm, "acme energy llc");
        assert_eq!(record.document_url.as_deref(), Some("https://example.com/doc.pdf"));
        assert_eq!(record.raw_json["docket"], "extra-field-kept-in-raw-json");
    }

    #[test]
    fn skips_rows_without_source_key() {
        let rows = vec![
            json!({"title": "no key"}),
            json!({"source_key": "TX-002", "entity_name": "Other Corp"}),
        ];
        let records = map_rows(&rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_key, "TX-002");
    }

    #[test]
    fn missing_document_url_maps_to_none() {
        let rows = vec![json!({"source_key": "TX-003", "entity_name": "Acme"})];
        let records = map_rows(&rows);
        assert_eq!(records[0].document_url, None);
    }

    #[tokio::test]
    async fn reads_a_json_array_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"source_key": "TX-010", "entity_name": "Acme", "region": "TX"}}]"#
        )
        .unwrap();

        let connector = JsonFileConnector::new("test", file.path(), file.path());
        let records = connector.fetch_bulk().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_key, "TX-010");
    }

    #[tokio::test]
    async fn missing_file_is_a_validation_error() {
        let connector = JsonFileConnector::new("test", "/nonexistent/bulk.json", "/nonexistent/recent.json");
        let err = connector.fetch_bulk().await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
