//! Thin HTTP surface. Handlers map requests onto core operations and map
//! the error taxonomy onto status codes; no business logic lives here.

pub mod handlers;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::alerts::AlertService;
use crate::connectors::Connector;
use crate::db::Database;
use crate::error::AppError;
use crate::ingest::IngestService;
use crate::TARGET_WEB_REQUEST;

pub struct AppState {
    pub db: Database,
    pub ingest: IngestService,
    pub alerts: AlertService,
    pub connector: Arc<dyn Connector>,
    pub expose_errors: bool,
    pub started_at: Instant,
}

impl AppState {
    /// Attach the redaction flag so storage detail only leaks outside
    /// production.
    pub fn fail(&self, error: AppError) -> ApiError {
        ApiError {
            error,
            expose: self.expose_errors,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    error: AppError,
    expose: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.error {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Quota(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self.error {
            AppError::Storage { .. } if !self.expose => "internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ingest/bulk", post(handlers::ingest_bulk))
        .route("/api/ingest/recent", post(handlers::ingest_recent))
        .route("/api/alerts", post(handlers::create_alert))
        .route("/api/alerts/{id}", delete(handlers::delete_alert))
        .route("/api/alerts/user/{user_id}", get(handlers::user_alerts))
        .route(
            "/api/alerts/user/{user_id}/stats",
            get(handlers::user_alert_stats),
        )
        .route("/api/alerts/logs", get(handlers::alert_logs))
        .route("/api/ingestion/history", get(handlers::ingestion_history))
        .route("/api/records", get(handlers::list_records))
        .route("/api/export/csv", get(handlers::export_csv))
        .route("/health", get(handlers::health))
        .route("/api/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(target: TARGET_WEB_REQUEST, "Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves on ctrl-c or SIGTERM; axum then stops accepting and drains
/// in-flight requests.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!(target: TARGET_WEB_REQUEST, "Shutdown signal received; draining");
}
