//! Pre-write validation of canonical records. The first failing record
//! aborts the run before anything touches the database.

use crate::error::AppError;
use crate::record::{
    normalize_entity_name, parse_published_at, valid_region, CanonicalRecord, MAX_SOURCE_KEY_LEN,
};

pub fn validate_records(records: &[CanonicalRecord]) -> Result<(), AppError> {
    for (index, record) in records.iter().enumerate() {
        let problems = record_problems(record);
        if !problems.is_empty() {
            return Err(AppError::Validation(format!(
                "record {} ({}): {}",
                index,
                if record.source_key.is_empty() {
                    "<no source_key>"
                } else {
                    &record.source_key
                },
                problems.join("; ")
            )));
        }
    }
    Ok(())
}

/// Every reason a single record is unacceptable, so the error names them
/// all at once instead of one per retry.
pub fn record_problems(record: &CanonicalRecord) -> Vec<String> {
    let mut problems = Vec::new();

    let required = [
        ("source_key", &record.source_key),
        ("published_at", &record.published_at),
        ("title", &record.title),
        ("entity_name_raw", &record.entity_name_raw),
        ("entity_name_norm", &record.entity_name_norm),
        ("region", &record.region),
        ("record_id", &record.record_id),
        ("status", &record.status),
    ];
    for (field, value) in required {
        if value.is_empty() {
            problems.push(format!("{} is required", field));
        }
    }

    if record.source_key.len() > MAX_SOURCE_KEY_LEN {
        problems.push(format!(
            "source_key exceeds {} characters",
            MAX_SOURCE_KEY_LEN
        ));
    }
    if !record.published_at.is_empty() && parse_published_at(&record.published_at).is_none() {
        problems.push(format!("published_at not parseable: {}", record.published_at));
    }
    if !record.region.is_empty() && !valid_region(&record.region) {
        problems.push(format!("region must match [A-Z]{{2}}: {}", record.region));
    }
    if !record.entity_name_raw.is_empty()
        && record.entity_name_norm != normalize_entity_name(&record.entity_name_raw)
    {
        problems.push("entity_name_norm does not match normalized entity_name_raw".to_string());
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> CanonicalRecord {
        CanonicalRecord {
            source_key: "TX-001".into(),
            published_at: "2024-01-10T00:00:00Z".into(),
            title: "Enforcement order".into(),
            entity_name_raw: "Acme Energy LLC".into(),
            entity_name_norm: "acme energy llc".into(),
            region: "TX".into(),
            record_id: "R1".into(),
            status: "open".into(),
            document_url: None,
            raw_json: json!({}),
        }
    }

    #[test]
    fn valid_record_passes() {
        assert!(record_problems(&valid()).is_empty());
        assert!(validate_records(&[valid(), valid()]).is_ok());
    }

    #[test]
    fn lowercase_region_is_rejected() {
        let mut record = valid();
        record.region = "tx".into();
        let problems = record_problems(&record);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("region"));
    }

    #[test]
    fn missing_fields_are_all_named() {
        let mut record = valid();
        record.title.clear();
        record.status.clear();
        let problems = record_problems(&record);
        assert!(problems.iter().any(|p| p.contains("title")));
        assert!(problems.iter().any(|p| p.contains("status")));
    }

    #[test]
    fn unparseable_published_at_is_rejected() {
        let mut record = valid();
        record.published_at = "yesterday".into();
        assert!(record_problems(&record)
            .iter()
            .any(|p| p.contains("published_at")));
    }

    #[test]
    fn oversized_source_key_is_rejected() {
        let mut record = valid();
        record.source_key = "X".repeat(256);
        assert!(record_problems(&record)
            .iter()
            .any(|p| p.contains("source_key")));
    }

    #[test]
    fn mismatched_normalization_is_rejected() {
        let mut record = valid();
        record.entity_name_norm = "something else".into();
        assert!(record_problems(&record)
            .iter()
            .any(|p| p.contains("entity_name_norm")));
    }

    #[test]
    fn first_failure_names_the_index() {
        let mut bad = valid();
        bad.region = "tex".into();
        let err = validate_records(&[valid(), bad]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("record 1"), "got: {}", message);
        assert!(message.contains("region"));
    }
}
