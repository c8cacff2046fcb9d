//! Transaction and admin HTTP surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use relay_core::{ErrorBody, TransactionStatus};
use relay_monitor::{MonitorError, MonitorService};
use relay_transactions::{
    AdminFacade, TransactionError, TransactionRequest, TransactionService,
};
use relay_webhooks::DeliveryService;

/// Shared state for the transaction and admin routes.
#[derive(Clone)]
pub struct ApiState {
    pub transactions: Arc<TransactionService>,
    pub admin: Arc<AdminFacade>,
    pub monitor: Arc<MonitorService>,
    pub delivery: DeliveryService,
}

/// Terminal error mapping for every public entry point.
pub struct ApiError(Response);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.0
    }
}

impl From<TransactionError> for ApiError {
    fn from(err: TransactionError) -> Self {
        let (status, kind, details) = match &err {
            TransactionError::NotFound(_) => (StatusCode::NOT_FOUND, "transaction_not_found", None),
            TransactionError::Duplicate { id, status } => (
                StatusCode::CONFLICT,
                "duplicate_transaction",
                Some(json!({"existingTransactionId": id, "existingStatus": status})),
            ),
            TransactionError::IllegalTransition { from, to, .. } => (
                StatusCode::BAD_REQUEST,
                "illegal_transition",
                Some(json!({"from": from, "to": to})),
            ),
            TransactionError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error", None),
            TransactionError::SweepInProgress => (StatusCode::CONFLICT, "sweep_in_progress", None),
            TransactionError::CorruptStatus { .. }
            | TransactionError::Database(_)
            | TransactionError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let mut body = ErrorBody::new(status.as_u16(), kind, err.to_string(), "");
        if let Some(details) = details {
            body = body.with_details(details);
        }
        Self((status, Json(body)).into_response())
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::SweepInProgress => {
                let body = ErrorBody::new(409, "sweep_in_progress", err.to_string(), "");
                Self((StatusCode::CONFLICT, Json(body)).into_response())
            }
            MonitorError::Transaction(inner) => inner.into(),
            other => {
                let body = ErrorBody::new(500, "internal_error", other.to_string(), "");
                Self((StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Request/response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTransactionRequest {
    pub transaction_id: Uuid,
    pub origin_system: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub webhook_url: Option<String>,
    pub webhook_security_token: Option<String>,
    #[serde(default)]
    pub retry: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub origin_system: Option<String>,
    pub status: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub target_status: String,
    #[serde(default)]
    pub notes: String,
    pub admin_user: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn submit_transaction(
    State(state): State<ApiState>,
    Json(request): Json<SubmitTransactionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let txn = state
        .transactions
        .process(TransactionRequest {
            transaction_id: request.transaction_id,
            origin_system: request.origin_system,
            payload: request.payload,
            webhook_url: request.webhook_url,
            webhook_security_token: request.webhook_security_token,
            retry: request.retry,
        })
        .await?;
    Ok(Json(serde_json::to_value(txn).unwrap_or_default()))
}

async fn get_transaction(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let txn = state.admin.get_transaction(id).await?;
    Ok(Json(serde_json::to_value(txn).unwrap_or_default()))
}

async fn get_history(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let history = state.admin.get_history(id).await?;
    Ok(Json(serde_json::to_value(history).unwrap_or_default()))
}

async fn search_transactions(
    State(state): State<ApiState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(TransactionStatus::parse(raw).ok_or_else(|| {
            ApiError::from(TransactionError::Validation(format!(
                "Unknown status: {raw}"
            )))
        })?),
        None => None,
    };

    let rows = state
        .admin
        .search(
            query.origin_system.as_deref(),
            status,
            query.created_from,
            query.created_to,
            query.limit.clamp(1, 100),
            query.offset.max(0),
        )
        .await?;
    Ok(Json(serde_json::to_value(rows).unwrap_or_default()))
}

async fn transaction_stats(
    State(state): State<ApiState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.admin.stats().await?))
}

async fn resolve_transaction(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let target = TransactionStatus::parse(&request.target_status).ok_or_else(|| {
        ApiError::from(TransactionError::Validation(format!(
            "Unknown status: {}",
            request.target_status
        )))
    })?;

    let txn = state
        .admin
        .resolve_transaction(id, target, &request.notes, &request.admin_user)
        .await?;
    Ok(Json(serde_json::to_value(txn).unwrap_or_default()))
}

async fn reconcile_transaction(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let txn = state.admin.reconcile_transaction(id).await?;
    Ok(Json(serde_json::to_value(txn).unwrap_or_default()))
}

async fn run_monitor(
    State(state): State<ApiState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state.monitor.run_sweep().await?;
    Ok(Json(serde_json::to_value(report).unwrap_or_default()))
}

async fn run_reconciliation(
    State(state): State<ApiState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state.monitor.run_reconciliation_pass().await?;
    Ok(Json(serde_json::to_value(report).unwrap_or_default()))
}

async fn system_metrics(
    State(state): State<ApiState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut metrics = state.monitor.system_metrics().await?;
    if let Ok(webhook_stats) = state.delivery.statistics().await {
        if let Some(map) = metrics.as_object_mut() {
            map.insert("webhook_metrics".to_string(), webhook_stats);
        }
    }
    Ok(Json(metrics))
}

async fn period_statistics(
    State(state): State<ApiState>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.admin.period_statistics(query.from, query.to).await?))
}

async fn list_transaction_deliveries(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // 404 for unknown transactions rather than an empty list.
    let _ = state.admin.get_transaction(id).await?;

    let deliveries = relay_db::models::WebhookDelivery::list_by_transaction(
        state.delivery.pool(),
        id,
        query.limit.clamp(1, 100),
        query.offset.max(0),
    )
    .await
    .map_err(|e| ApiError::from(TransactionError::Database(e)))?;
    Ok(Json(serde_json::to_value(deliveries).unwrap_or_default()))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Build the transaction + admin router.
pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/transactions",
            post(submit_transaction).get(search_transactions),
        )
        .route("/api/transactions/stats", get(transaction_stats))
        .route("/api/transactions/:id", get(get_transaction))
        .route("/api/transactions/:id/history", get(get_history))
        .route(
            "/api/transactions/:id/deliveries",
            get(list_transaction_deliveries),
        )
        .route("/api/admin/transactions/:id/resolve", post(resolve_transaction))
        .route(
            "/api/admin/transactions/:id/reconcile",
            post(reconcile_transaction),
        )
        .route("/api/admin/monitor/run", post(run_monitor))
        .route("/api/admin/reconciliation/run", post(run_reconciliation))
        .route("/api/admin/metrics", get(system_metrics))
        .route("/api/admin/statistics", get(period_statistics))
        .with_state(state)
}
