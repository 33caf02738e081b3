//! Source connectors. A connector reads its source, parses, and maps rows
//! to the canonical record shape with the entity name pre-normalized and
//! the original row kept verbatim in `raw_json`. No database access, no
//! hashing, no business logic; the engine owns the recency window and the
//! `hours` hint is informational.

pub mod file;

use async_trait::async_trait;

use crate::error::AppError;
use crate::record::CanonicalRecord;

#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    /// The complete dataset, treated as the master of record.
    async fn fetch_bulk(&self) -> Result<Vec<CanonicalRecord>, AppError>;

    /// The rolling short-window feed.
    async fn fetch_recent(&self, hours: i64) -> Result<Vec<CanonicalRecord>, AppError>;
}

pub use self::file::JsonFileConnector;
