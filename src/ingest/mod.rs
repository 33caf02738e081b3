pub mod service;
pub mod validate;

pub use self::service::{IngestOptions, IngestService, IngestSummary, RECENT_WINDOW_HOURS};
