//! Node API endpoints.
//!
//! Registration and heartbeats are called by node agents; listing and
//! removal by operators.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fleet_id::NodeId;

use super::{parse_id, ListResponse};
use crate::api::auth::{AgentAuth, OperatorAuth};
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::models::NodeRegistration;
use crate::state::AppState;

/// Create node routes.
///
/// Nodes are top-level infrastructure resources: /v1/nodes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_nodes))
        .route("/register", post(register_node))
        .route("/{node_id}", get(get_node).delete(remove_node))
        .route("/{node_id}/heartbeat", post(heartbeat))
}

/// Register a node, or refresh an existing one.
///
/// POST /v1/nodes/register
async fn register_node(
    State(state): State<AppState>,
    ctx: RequestContext,
    _agent: AgentAuth,
    Json(req): Json<NodeRegistration>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.nodes().register(req).await.map_err(|e| ctx.error(e))?;
    Ok(Json(node))
}

/// POST /v1/nodes/{node_id}/heartbeat
async fn heartbeat(
    State(state): State<AppState>,
    ctx: RequestContext,
    _agent: AgentAuth,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node_id: NodeId = parse_id(&node_id, "node", &ctx)?;
    state
        .nodes()
        .heartbeat(&node_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/nodes
async fn list_nodes(
    State(state): State<AppState>,
    ctx: RequestContext,
    _operator: OperatorAuth,
) -> Result<impl IntoResponse, ApiError> {
    let nodes = state.nodes().list().await.map_err(|e| ctx.error(e))?;
    Ok(Json(ListResponse::from(nodes)))
}

/// GET /v1/nodes/{node_id}
async fn get_node(
    State(state): State<AppState>,
    ctx: RequestContext,
    _operator: OperatorAuth,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node_id: NodeId = parse_id(&node_id, "node", &ctx)?;
    let node = state.nodes().get(&node_id).await.map_err(|e| ctx.error(e))?;
    Ok(Json(node))
}

/// Remove a node that no longer hosts any workload.
///
/// DELETE /v1/nodes/{node_id}
async fn remove_node(
    State(state): State<AppState>,
    ctx: RequestContext,
    _operator: OperatorAuth,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node_id: NodeId = parse_id(&node_id, "node", &ctx)?;
    state
        .nodes()
        .remove(&node_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(StatusCode::NO_CONTENT)
}
