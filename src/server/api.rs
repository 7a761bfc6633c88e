use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::warn;

use claimsync_common::PayoutId;

use crate::errors::ReconcileError;
use crate::operator::{Operator, OperatorAuthorizer, bearer_token};
use crate::reconcile::{ManualRetryResult, Reconciler, RunReport, RunTrigger};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub authorizer: Arc<dyn OperatorAuthorizer>,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

const DEFAULT_RUNS_LIMIT: usize = 20;
const MAX_RUNS_LIMIT: usize = 100;

// ── Error type ────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Unauthorized(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Unauthorized => ApiError::Unauthorized(err.to_string()),
            e if e.is_not_found() => ApiError::NotFound(e.to_string()),
            e => {
                warn!(error = %e, "Operator request failed");
                ApiError::Internal(e.to_string())
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/payouts/{id}/retry", post(retry_payout))
        .route("/api/reconciliation/run", post(run_reconciliation))
        .route("/api/reconciliation/runs", get(list_runs))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Operator, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);
    Ok(state.authorizer.authorize(token)?)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn retry_payout(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ManualRetryResult>, ApiError> {
    let operator = authorize(&state, &headers)?;
    let result = state
        .reconciler
        .manual_retry(&PayoutId::new(id), &operator)
        .await?;
    Ok(Json(result))
}

async fn run_reconciliation(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<RunReport>, ApiError> {
    let operator = authorize(&state, &headers)?;
    let report = state
        .reconciler
        .run_pass(RunTrigger::Manual {
            operator: operator.id,
        })
        .await?;
    Ok(Json(report))
}

async fn list_runs(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RunReport>>, ApiError> {
    authorize(&state, &headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT);
    if limit == 0 || limit > MAX_RUNS_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_RUNS_LIMIT
        )));
    }
    let runs = state
        .reconciler
        .audit()
        .list_runs(limit)
        .await
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    Ok(Json(runs))
}
