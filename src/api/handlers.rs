use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::alerts::PlanInfo;
use crate::db::alert::{ActionType, AlertLogFilter, AlertRule};
use crate::db::record::RecordFilter;
use crate::error::AppError;
use crate::export::records_to_csv;
use crate::ingest::{IngestOptions, RECENT_WINDOW_HOURS};
use crate::record::SourceType;

const DEFAULT_PAGE_LIMIT: i64 = 20;
const MAX_PAGE_LIMIT: i64 = 100;
const EXPORT_ROW_CAP: i64 = 10_000;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestRequest {
    pub batch_size: Option<usize>,
    pub validate: Option<bool>,
    pub hours: Option<i64>,
}

impl IngestRequest {
    fn options(&self) -> IngestOptions {
        let defaults = IngestOptions::default();
        IngestOptions {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            validate: self.validate.unwrap_or(defaults.validate),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlertRequest {
    pub user_id: i64,
    #[serde(default)]
    pub entity_name_norm: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAlertRequest {
    pub user_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertLogQuery {
    pub alert_rule_id: Option<i64>,
    pub user_id: Option<i64>,
    pub action_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordsQuery {
    pub region: Option<String>,
    pub entity_name_norm: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

#[derive(Serialize)]
pub struct Paginated<T> {
    pub rows: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Serialize)]
pub struct CreateAlertResponse {
    pub rule: AlertRule,
    pub plan: PlanInfo,
}

/// Clamp pagination to the allowed window: limit in [1, 100] (default 20),
/// offset non-negative.
fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

pub async fn ingest_bulk(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<IngestRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let records = state
        .connector
        .fetch_bulk()
        .await
        .map_err(|e| state.fail(e))?;
    let summary = state
        .ingest
        .ingest_records(records, SourceType::Bulk, &request.options())
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(summary))
}

pub async fn ingest_recent(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<IngestRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let hours = request.hours.unwrap_or(RECENT_WINDOW_HOURS);
    let records = state
        .connector
        .fetch_recent(hours)
        .await
        .map_err(|e| state.fail(e))?;
    let summary = state
        .ingest
        .ingest_records(records, SourceType::Recent, &request.options())
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(summary))
}

pub async fn create_alert(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateAlertRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (rule, plan) = state
        .alerts
        .create_rule(request.user_id, request.entity_name_norm, request.region)
        .await
        .map_err(|e| state.fail(e))?;
    Ok((StatusCode::CREATED, Json(CreateAlertResponse { rule, plan })))
}

pub async fn delete_alert(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<i64>,
    Json(request): Json<DeleteAlertRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .alerts
        .delete_rule(rule_id, request.user_id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn user_alerts(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let rules = state
        .alerts
        .cached_rules(user_id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(rules))
}

pub async fn user_alert_stats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .alerts
        .user_stats(user_id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(stats))
}

pub async fn alert_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertLogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let action_type = match query.action_type.as_deref() {
        None => None,
        Some(raw) => Some(ActionType::parse(raw).ok_or_else(|| {
            state.fail(AppError::Validation(format!(
                "actionType must be insert or update, got {}",
                raw
            )))
        })?),
    };

    let filter = AlertLogFilter {
        alert_rule_id: query.alert_rule_id,
        user_id: query.user_id,
        action_type,
    };
    let (limit, offset) = clamp_page(query.limit, query.offset);
    let (rows, total) = state
        .db
        .alert_logs(&filter, limit, offset)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(Paginated {
        rows,
        pagination: Pagination {
            limit,
            offset,
            total,
        },
    }))
}

pub async fn ingestion_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (limit, offset) = clamp_page(query.limit, query.offset);
    let (rows, total) = state
        .db
        .run_history(limit, offset)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(Paginated {
        rows,
        pagination: Pagination {
            limit,
            offset,
            total,
        },
    }))
}

pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = RecordFilter {
        region: query.region,
        entity_name_norm: query.entity_name_norm,
    };
    let (limit, offset) = clamp_page(query.limit, query.offset);
    let (rows, total) = state
        .db
        .list_records(&filter, limit, offset)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(Paginated {
        rows,
        pagination: Pagination {
            limit,
            offset,
            total,
        },
    }))
}

pub async fn export_csv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = RecordFilter {
        region: query.region,
        entity_name_norm: query.entity_name_norm,
    };
    let (rows, _) = state
        .db
        .list_records(&filter, EXPORT_ROW_CAP, 0)
        .await
        .map_err(|e| state.fail(e))?;

    let body = records_to_csv(&rows);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"records.csv\"",
            ),
        ],
        body,
    ))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.db.health_check().await {
        (StatusCode::OK, Json(json!({"status": "ok"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded"})),
        )
    }
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ingestion": state.ingest.metrics(),
        "pool": state.db.stats(),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_clamp_defaults_and_caps() {
        assert_eq!(clamp_page(None, None), (20, 0));
        assert_eq!(clamp_page(Some(50), Some(10)), (50, 10));
        assert_eq!(clamp_page(Some(500), None), (100, 0));
        assert_eq!(clamp_page(Some(0), Some(-5)), (1, 0));
    }

    #[test]
    fn ingest_request_merges_defaults() {
        let request = IngestRequest {
            batch_size: Some(10),
            validate: None,
            hours: None,
        };
        let options = request.options();
        assert_eq!(options.batch_size, 10);
        assert!(options.validate);
    }
}
