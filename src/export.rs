//! CSV assembly for the export endpoint. The quoting is RFC-4180 style:
//! fields containing commas, quotes, or newlines are wrapped and inner
//! quotes doubled.

use crate::db::record::RecordRow;

const HEADER: &str = "source_key,published_at,title,entity_name,region,record_id,status,document_url,last_source_type,updated_at";

pub fn records_to_csv(rows: &[RecordRow]) -> String {
    let mut out = String::with_capacity(64 + rows.len() * 128);
    out.push_str(HEADER);
    out.push('\n');

    for row in rows {
        let fields = [
            row.source_key.as_str(),
            row.published_at.as_str(),
            row.title.as_str(),
            row.entity_name_raw.as_str(),
            row.region.as_str(),
            row.record_id.as_str(),
            row.status.as_str(),
            row.document_url.as_deref().unwrap_or(""),
            row.last_source_type.as_str(),
        ];
        let updated_at = row.updated_at.to_rfc3339();

        for field in fields {
            out.push_str(&escape(field));
            out.push(',');
        }
        out.push_str(&escape(&updated_at));
        out.push('\n');
    }
    out
}

fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(title: &str) -> RecordRow {
        RecordRow {
            id: 1,
            source_key: "TX-001".into(),
            published_at: "2024-01-10T00:00:00Z".into(),
            title: title.into(),
            entity_name_raw: "Acme Energy LLC".into(),
            entity_name_norm: "acme energy llc".into(),
            region: "TX".into(),
            record_id: "R1".into(),
            status: "open".into(),
            document_url: None,
            content_hash: "0".repeat(64),
            last_source_type: "bulk".into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn header_plus_one_line_per_row() {
        let csv = records_to_csv(&[row("A"), row("B")]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("source_key,"));
        assert!(lines[1].starts_with("TX-001,"));
    }

    #[test]
    fn fields_with_commas_and_quotes_are_escaped() {
        let csv = records_to_csv(&[row(r#"Order, "final" notice"#)]);
        assert!(csv.contains(r#""Order, ""final"" notice""#));
    }

    #[test]
    fn empty_document_url_stays_empty() {
        let csv = records_to_csv(&[row("A")]);
        assert!(csv.contains("open,,bulk"));
    }
}
