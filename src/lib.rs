pub mod alerts;
pub mod api;
pub mod config;
pub mod connectors;
pub mod db;
pub mod error;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod record;

pub const TARGET_DB: &str = "db_query";
pub const TARGET_INGEST: &str = "ingest";
pub const TARGET_ALERT: &str = "alert";
pub const TARGET_WEB_REQUEST: &str = "web_request";
