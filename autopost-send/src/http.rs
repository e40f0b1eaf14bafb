//! HTTP trigger surface and read-only dashboard feeds

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use libautopost::service::SchedulerStatus;
use libautopost::types::{AccountSummary, PostingHistory};
use libautopost::{AutopilotService, AutopostError, TickReport};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AutopilotService>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scheduler/run", post(run_scheduler))
        .route("/scheduler/status", get(scheduler_status))
        .route("/accounts", get(list_accounts))
        .route("/history", get(list_history))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Library errors rendered as `{"error": ...}`
pub struct ApiError(AutopostError);

impl From<AutopostError> for ApiError {
    fn from(e: AutopostError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AutopostError::NotFound(_) => StatusCode::NOT_FOUND,
            AutopostError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn run_scheduler(State(state): State<AppState>) -> Result<Json<TickReport>, ApiError> {
    let now = chrono::Utc::now().timestamp();
    let report = state.service.run_tick(now).await?;
    Ok(Json(report))
}

async fn scheduler_status(State(state): State<AppState>) -> Result<Json<SchedulerStatus>, ApiError> {
    let now = chrono::Utc::now().timestamp();
    Ok(Json(state.service.status(now).await?))
}

async fn list_accounts(State(state): State<AppState>) -> Result<Json<Vec<AccountSummary>>, ApiError> {
    let now = chrono::Utc::now().timestamp();
    Ok(Json(state.service.accounts(now).await?))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    account_id: Option<String>,
    limit: Option<usize>,
}

async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PostingHistory>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let history = state
        .service
        .history(query.account_id.as_deref(), limit)
        .await?;
    Ok(Json(history))
}
