//! Account endpoints.
//!
//! Operators create accounts and top up credits. The plaintext token is only
//! ever returned by the create call.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fleet_id::AccountId;
use serde::Deserialize;

use super::{parse_id, ListResponse};
use crate::accounts::CreateAccount;
use crate::api::auth::{OperatorAuth, TenantAuth};
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_accounts).post(create_account))
        .route("/me", get(get_me))
        .route("/{account_id}", get(get_account))
        .route("/{account_id}/credits", post(add_credits))
}

#[derive(Debug, Deserialize)]
pub struct AddCreditsRequest {
    pub amount: i64,
}

/// POST /v1/accounts
async fn create_account(
    State(state): State<AppState>,
    ctx: RequestContext,
    _operator: OperatorAuth,
    Json(req): Json<CreateAccount>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.accounts().create(req).await.map_err(|e| ctx.error(e))?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /v1/accounts
async fn list_accounts(
    State(state): State<AppState>,
    ctx: RequestContext,
    _operator: OperatorAuth,
) -> Result<impl IntoResponse, ApiError> {
    let accounts = state.accounts().list().await.map_err(|e| ctx.error(e))?;
    Ok(Json(ListResponse::from(accounts)))
}

/// The calling tenant's own account.
///
/// GET /v1/accounts/me
async fn get_me(TenantAuth(account): TenantAuth) -> impl IntoResponse {
    Json(account)
}

/// GET /v1/accounts/{account_id}
async fn get_account(
    State(state): State<AppState>,
    ctx: RequestContext,
    _operator: OperatorAuth,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let account_id: AccountId = parse_id(&account_id, "account", &ctx)?;
    let account = state
        .accounts()
        .get(&account_id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(account))
}

/// POST /v1/accounts/{account_id}/credits
async fn add_credits(
    State(state): State<AppState>,
    ctx: RequestContext,
    _operator: OperatorAuth,
    Path(account_id): Path<String>,
    Json(req): Json<AddCreditsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account_id: AccountId = parse_id(&account_id, "account", &ctx)?;
    let account = state
        .accounts()
        .add_credits(&account_id, req.amount)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(account))
}
