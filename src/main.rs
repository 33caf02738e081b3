use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use regwatch::alerts::AlertService;
use regwatch::api::{self, AppState};
use regwatch::config::Config;
use regwatch::connectors::{Connector, JsonFileConnector};
use regwatch::db::Database;
use regwatch::ingest::IngestService;
use regwatch::logging;
use regwatch::metrics::IngestMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    logging::configure_logging();

    let config = Config::from_env()?;

    let db = Database::connect(&config.db)
        .await
        .context("database startup failed")?;

    let metrics = Arc::new(IngestMetrics::new());
    let ingest = IngestService::new(db.clone(), metrics);
    let alerts = AlertService::new(db.clone());
    let connector: Arc<dyn Connector> = Arc::new(JsonFileConnector::new(
        "json-file",
        &config.bulk_data_path,
        &config.recent_data_path,
    ));

    let state = Arc::new(AppState {
        db: db.clone(),
        ingest,
        alerts,
        connector,
        expose_errors: config.expose_errors,
        started_at: Instant::now(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting regwatch on port {}", config.port);

    if let Err(err) = api::serve(addr, state).await {
        error!("Server error: {}", err);
    }

    // The listener has drained; close the gateway under its ceiling.
    db.close().await;
    info!("Shutdown complete");

    Ok(())
}
