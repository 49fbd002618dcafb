//! Tier catalog endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use fleet_id::TierId;

use super::{parse_id, ListResponse};
use crate::api::auth::OperatorAuth;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::scheduler::CreateTier;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tiers).post(create_tier))
        .route("/{tier_id}", delete(delete_tier))
}

/// Tiers are public so tenants can pick a shape.
///
/// GET /v1/tiers
async fn list_tiers(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let tiers = state.tiers().list().await.map_err(|e| ctx.error(e))?;
    Ok(Json(ListResponse::from(tiers)))
}

/// POST /v1/tiers
async fn create_tier(
    State(state): State<AppState>,
    ctx: RequestContext,
    _operator: OperatorAuth,
    Json(req): Json<CreateTier>,
) -> Result<impl IntoResponse, ApiError> {
    let tier = state.tiers().create(req).await.map_err(|e| ctx.error(e))?;
    Ok((StatusCode::CREATED, Json(tier)))
}

/// DELETE /v1/tiers/{tier_id}
async fn delete_tier(
    State(state): State<AppState>,
    ctx: RequestContext,
    _operator: OperatorAuth,
    Path(tier_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tier_id: TierId = parse_id(&tier_id, "tier", &ctx)?;
    state
        .tiers()
        .delete(&tier_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(StatusCode::NO_CONTENT)
}
