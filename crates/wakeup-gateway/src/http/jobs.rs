//! Thin job management API under /api.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;
use wakeup_notify::dispatcher::DeliveryLogEntry;
use wakeup_scheduler::{
    Execution, JobSchedule, JobStatus, NewJob, ScheduledJob, SchedulerError,
};

use wakeup_weather::types::ApiLogEntry;

use crate::app::AppState;
use crate::http::auth::verify_api_token;

type ApiResult<T> = Result<T, (StatusCode, Json<Value>)>;

const DEFAULT_EXECUTION_LIMIT: usize = 20;
const MAX_EXECUTION_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct OwnerProfile {
    pub timezone: String,
    pub location: Option<String>,
}

fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    verify_api_token(headers, state.config.gateway.api_token.as_deref())
}

/// POST /api/jobs
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new): Json<NewJob>,
) -> ApiResult<(StatusCode, Json<ScheduledJob>)> {
    authorize(&state, &headers)?;
    let job = state.store.create_job(new, Utc::now()).map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ScheduledJob>> {
    authorize(&state, &headers)?;
    state.store.get_job(&id).map(Json).map_err(api_error)
}

/// PATCH /api/jobs/{id}/status
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(change): Json<StatusChange>,
) -> ApiResult<Json<ScheduledJob>> {
    authorize(&state, &headers)?;
    state
        .store
        .set_status(&id, change.status, Utc::now())
        .map(Json)
        .map_err(api_error)
}

/// PATCH /api/jobs/{id}/schedule
pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(schedule): Json<JobSchedule>,
) -> ApiResult<Json<ScheduledJob>> {
    authorize(&state, &headers)?;
    state
        .store
        .update_schedule(&id, schedule, Utc::now())
        .map(Json)
        .map_err(api_error)
}

/// GET /api/jobs/{id}/executions?limit=N
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<ExecutionQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Execution>>> {
    authorize(&state, &headers)?;
    state.store.get_job(&id).map_err(api_error)?;
    let limit = q
        .limit
        .unwrap_or(DEFAULT_EXECUTION_LIMIT)
        .clamp(1, MAX_EXECUTION_LIMIT);
    state
        .store
        .list_executions(&id, limit)
        .map(Json)
        .map_err(api_error)
}

/// POST /api/jobs/{id}/test: fire now through the normal pipeline.
pub async fn trigger_test(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<Execution>)> {
    authorize(&state, &headers)?;
    let exec = state.engine.trigger_now(&id, Utc::now()).map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(exec)))
}

/// GET /api/executions/{id}/deliveries: every dispatch attempt for one execution.
pub async fn execution_deliveries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<DeliveryLogEntry>>> {
    authorize(&state, &headers)?;
    state.store.get_execution(&id).map_err(api_error)?;
    state.dispatcher.log_for_execution(&id).map(Json).map_err(|e| {
        error!(execution_id = %id, error = %e, "failed to read delivery log");
        internal_error()
    })
}

/// GET /api/weather/log?limit=N: recent weather provider calls.
pub async fn weather_api_log(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LogQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ApiLogEntry>>> {
    authorize(&state, &headers)?;
    let limit = q.limit.unwrap_or(DEFAULT_EXECUTION_LIMIT).clamp(1, MAX_EXECUTION_LIMIT);
    state.weather.recent_api_log(limit).map(Json).map_err(|e| {
        error!(error = %e, "failed to read weather api log");
        internal_error()
    })
}

/// PUT /api/owners/{owner_id}/profile: propagate zone/location to every job.
pub async fn update_owner_profile(
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<String>,
    headers: HeaderMap,
    Json(profile): Json<OwnerProfile>,
) -> ApiResult<Json<Value>> {
    authorize(&state, &headers)?;
    let updated = state
        .store
        .update_owner_profile(
            &owner_id,
            &profile.timezone,
            profile.location.as_deref(),
            Utc::now(),
        )
        .map_err(api_error)?;
    Ok(Json(json!({"owner_id": owner_id, "jobs_updated": updated})))
}

fn api_error(e: SchedulerError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        SchedulerError::InvalidJob(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SchedulerError::JobNotFound { .. } | SchedulerError::ExecutionNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        SchedulerError::DuplicateExecution { .. } => StatusCode::CONFLICT,
        SchedulerError::Database(_) | SchedulerError::Serialization(_) => {
            error!(error = %e, "job API storage failure");
            return internal_error();
        }
    };
    (status, Json(json!({"error": e.to_string()})))
}

fn internal_error() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
}
