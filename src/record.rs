//! The canonical record contract shared by connectors, the ingestion
//! engine, and the query surface, plus the content fingerprint used for
//! change detection.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub const MAX_SOURCE_KEY_LEN: usize = 255;
pub const MAX_ENTITY_NAME_LEN: usize = 255;

/// Which feed wrote a record last. Bulk is the master of record; the
/// rolling recent feed must never clobber a bulk-written row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Bulk,
    Recent,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Bulk => "bulk",
            SourceType::Recent => "recent",
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bulk" => Ok(SourceType::Bulk),
            "recent" => Ok(SourceType::Recent),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One regulatory filing in canonical shape. Connectors produce these;
/// everything downstream consumes them unchanged. `raw_json` is the
/// unmodified source row and never participates in the fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub source_key: String,
    /// Kept exactly as received; the fingerprint hashes this string verbatim.
    pub published_at: String,
    pub title: String,
    pub entity_name_raw: String,
    pub entity_name_norm: String,
    pub region: String,
    pub record_id: String,
    pub status: String,
    pub document_url: Option<String>,
    pub raw_json: serde_json::Value,
}

/// Lowercase plus outer-whitespace trim. Diacritics, punctuation, and
/// suffixes (LLC, Inc.) are intentionally left alone; matching is
/// exact-after-lowercase.
pub fn normalize_entity_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Two ASCII uppercase letters, e.g. "TX".
pub fn valid_region(region: &str) -> bool {
    region.len() == 2 && region.bytes().all(|b| b.is_ascii_uppercase())
}

/// SHA-256 hex digest over the canonical field tuple. Keys are sorted
/// lexicographically and joined as `key:value` pairs with `|`; a missing
/// document_url contributes an empty string so present-vs-absent still
/// changes the digest.
pub fn fingerprint(record: &CanonicalRecord) -> String {
    let document_url = record.document_url.as_deref().unwrap_or("");
    // Lexicographic by key; keep this list in sync with CanonicalRecord.
    let canonical = format!(
        "document_url:{}|entity_name_norm:{}|entity_name_raw:{}|published_at:{}|record_id:{}|region:{}|source_key:{}|status:{}|title:{}",
        document_url,
        record.entity_name_norm,
        record.entity_name_raw,
        record.published_at,
        record.record_id,
        record.region,
        record.source_key,
        record.status,
        record.title,
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse a published_at instant. Producers mostly emit RFC-3339; some bulk
/// exports drop the seconds ("2024-01-10T00:00Z"), so that shorthand is
/// accepted too. Returns None rather than guessing for anything else.
pub fn parse_published_at(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%MZ") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CanonicalRecord {
        CanonicalRecord {
            source_key: "TX-001".into(),
            published_at: "2024-01-10T00:00Z".into(),
            title: "A".into(),
            entity_name_raw: "Acme Energy LLC".into(),
            entity_name_norm: "acme energy llc".into(),
            region: "TX".into(),
            record_id: "R1".into(),
            status: "open".into(),
            document_url: Some("u".into()),
            raw_json: json!({"id": "TX-001"}),
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint(&sample()), fingerprint(&sample()));
        assert_eq!(fingerprint(&sample()).len(), 64);
    }

    #[test]
    fn fingerprint_ignores_raw_json() {
        let a = sample();
        let mut b = sample();
        b.raw_json = json!({"completely": "different", "payload": [1, 2, 3]});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_tracks_every_canonical_field() {
        let base = fingerprint(&sample());

        let mut changed = sample();
        changed.title = "A2".into();
        assert_ne!(fingerprint(&changed), base);

        let mut changed = sample();
        changed.status = "closed".into();
        assert_ne!(fingerprint(&changed), base);

        let mut changed = sample();
        changed.document_url = None;
        assert_ne!(fingerprint(&changed), base);

        let mut changed = sample();
        changed.published_at = "2024-01-10T00:00:00Z".into();
        // Same instant, different spelling: the digest still changes.
        assert_ne!(fingerprint(&changed), base);
    }

    #[test]
    fn normalize_lowercases_and_trims() {
        assert_eq!(
            normalize_entity_name("  Acme Energy LLC "),
            "acme energy llc"
        );
        assert_eq!(normalize_entity_name("ACME"), "acme");
        // Inner whitespace is preserved.
        assert_eq!(normalize_entity_name("Acme  Corp"), "acme  corp");
    }

    #[test]
    fn region_validation() {
        assert!(valid_region("TX"));
        assert!(valid_region("NY"));
        assert!(!valid_region("tx"));
        assert!(!valid_region("TEX"));
        assert!(!valid_region("T"));
        assert!(!valid_region("T1"));
        assert!(!valid_region(""));
    }

    #[test]
    fn parses_rfc3339_and_minute_shorthand() {
        assert!(parse_published_at("2024-01-10T00:00:00Z").is_some());
        assert!(parse_published_at("2024-01-10T00:00:00+05:30").is_some());
        assert!(parse_published_at("2024-01-10T00:00Z").is_some());
        assert!(parse_published_at("2024-01-10 12:30:00").is_some());
        assert!(parse_published_at("not a date").is_none());
        assert!(parse_published_at("").is_none());
    }

    #[test]
    fn source_type_round_trips() {
        assert_eq!("bulk".parse::<SourceType>().unwrap(), SourceType::Bulk);
        assert_eq!("recent".parse::<SourceType>().unwrap(), SourceType::Recent);
        assert!("stream".parse::<SourceType>().is_err());
        assert_eq!(SourceType::Bulk.as_str(), "bulk");
    }
}
