//! Workload endpoints.
//!
//! Everything here is scoped to the calling tenant, except event submission
//! which comes from the node agent hosting the workload.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fleet_id::WorkloadId;
use serde::Serialize;

use super::{parse_id, ListResponse};
use crate::api::auth::{AgentAuth, TenantAuth};
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::clients::agent::{ContainerLogsQuery, SystemLogsQuery};
use crate::models::CreateWorkload;
use crate::state::AppState;
use crate::workloads::SubmitEvent;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workloads).post(create_workload))
        .route("/{workload_id}", get(get_workload).delete(delete_workload))
        .route("/{workload_id}/start", post(start_workload))
        .route("/{workload_id}/stop", post(stop_workload))
        .route("/{workload_id}/restart", post(restart_workload))
        .route(
            "/{workload_id}/events",
            get(list_events).post(submit_event),
        )
        .route("/{workload_id}/containers", get(list_containers))
        .route("/{workload_id}/containers/logs", get(container_logs))
        .route("/{workload_id}/system/logs", get(system_logs))
        .route("/{workload_id}/system/stats", get(system_stats))
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub lines: Vec<String>,
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Place and provision a workload.
///
/// POST /v1/workloads
async fn create_workload(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
    Json(req): Json<CreateWorkload>,
) -> Result<impl IntoResponse, ApiError> {
    let workload = state
        .workloads()
        .create(&account.id, req)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok((StatusCode::CREATED, Json(workload)))
}

/// GET /v1/workloads
async fn list_workloads(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
) -> Result<impl IntoResponse, ApiError> {
    let workloads = state
        .workloads()
        .list(&account.id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(ListResponse::from(workloads)))
}

/// GET /v1/workloads/{workload_id}
async fn get_workload(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx)?;
    let workload = state
        .workloads()
        .get(&account.id, &workload_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(workload))
}

/// DELETE /v1/workloads/{workload_id}
async fn delete_workload(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx)?;
    state
        .workloads()
        .delete(&account.id, &workload_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/workloads/{workload_id}/start
async fn start_workload(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx)?;
    state
        .workloads()
        .start(&account.id, &workload_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /v1/workloads/{workload_id}/stop
async fn stop_workload(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx)?;
    state
        .workloads()
        .stop(&account.id, &workload_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /v1/workloads/{workload_id}/restart
async fn restart_workload(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx)?;
    state
        .workloads()
        .restart(&account.id, &workload_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(StatusCode::ACCEPTED)
}

// =============================================================================
// Events
// =============================================================================

/// GET /v1/workloads/{workload_id}/events
async fn list_events(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx)?;
    let events = state
        .workloads()
        .list_events(&account.id, &workload_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(ListResponse::from(events)))
}

/// Record an event reported by the hosting node's agent.
///
/// Returns the workload with its re-derived status.
///
/// POST /v1/workloads/{workload_id}/events
async fn submit_event(
    State(state): State<AppState>,
    ctx: RequestContext,
    _agent: AgentAuth,
    Path(workload_id): Path<String>,
    Json(req): Json<SubmitEvent>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx)?;
    let workload = state
        .workloads()
        .submit_event(&workload_id, req)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(workload))
}

// =============================================================================
// Inspection
// =============================================================================

/// GET /v1/workloads/{workload_id}/containers
async fn list_containers(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx)?;
    let containers = state
        .workloads()
        .containers(&account.id, &workload_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(ListResponse::from(containers)))
}

/// GET /v1/workloads/{workload_id}/containers/logs?container=..&maxLines=..
async fn container_logs(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
    Path(workload_id): Path<String>,
    Query(query): Query<ContainerLogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx)?;
    let lines = state
        .workloads()
        .container_logs(&account.id, &workload_id, &query)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(LogsResponse { lines }))
}

/// GET /v1/workloads/{workload_id}/system/logs
async fn system_logs(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
    Path(workload_id): Path<String>,
    Query(query): Query<SystemLogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx)?;
    let lines = state
        .workloads()
        .system_logs(&account.id, &workload_id, &query)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(LogsResponse { lines }))
}

/// GET /v1/workloads/{workload_id}/system/stats
async fn system_stats(
    State(state): State<AppState>,
    ctx: RequestContext,
    TenantAuth(account): TenantAuth,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx)?;
    let stats = state
        .workloads()
        .system_stats(&account.id, &workload_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(stats))
}
