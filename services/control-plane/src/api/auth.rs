//! Authentication extractors.
//!
//! Three kinds of callers reach the API:
//! - Operators, holding the admin token: nodes, tiers, accounts.
//! - Node agents, holding the shared agent token: registration, heartbeats
//!   and workload events.
//! - Tenants, holding their account's token: their own workloads.
//!
//! All three present `Authorization: Bearer <token>`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

use crate::api::error::ApiError;
use crate::api::request_context::{header_string, RequestContext, AUTHORIZATION_HEADER};
use crate::models::Account;
use crate::state::AppState;

fn bearer_token(parts: &Parts, ctx: &RequestContext) -> Result<String, ApiError> {
    let Some(auth_value) = header_string(&parts.headers, AUTHORIZATION_HEADER) else {
        return Err(ApiError::unauthorized(
            "unauthorized",
            "Missing Authorization header",
        )
        .with_request_id(ctx.request_id.clone()));
    };

    let Some(token) = auth_value.trim().strip_prefix("Bearer ") else {
        return Err(ApiError::unauthorized(
            "invalid_authorization",
            "Authorization must be a Bearer token",
        )
        .with_request_id(ctx.request_id.clone()));
    };

    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::unauthorized(
            "invalid_authorization",
            "Authorization Bearer token cannot be empty",
        )
        .with_request_id(ctx.request_id.clone()));
    }
    Ok(token.to_string())
}

/// Compares digests so the comparison time does not depend on a shared prefix.
fn token_matches(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

async fn context(parts: &mut Parts, state: &AppState) -> RequestContext {
    match RequestContext::from_request_parts(parts, state).await {
        Ok(ctx) => ctx,
        Err(never) => match never {},
    }
}

/// A caller holding the admin token.
#[derive(Debug, Clone)]
pub struct OperatorAuth;

impl FromRequestParts<AppState> for OperatorAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let ctx = context(parts, state).await;
        let token = bearer_token(parts, &ctx)?;
        if !token_matches(&token, &state.auth().admin_token) {
            return Err(ApiError::unauthorized("unauthorized", "Invalid operator token")
                .with_request_id(ctx.request_id));
        }
        Ok(Self)
    }
}

/// A node agent holding the shared agent token.
#[derive(Debug, Clone)]
pub struct AgentAuth;

impl FromRequestParts<AppState> for AgentAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let ctx = context(parts, state).await;
        let token = bearer_token(parts, &ctx)?;
        if !token_matches(&token, &state.auth().agent_token) {
            return Err(ApiError::unauthorized("unauthorized", "Invalid agent token")
                .with_request_id(ctx.request_id));
        }
        Ok(Self)
    }
}

/// A tenant, resolved from its account token.
#[derive(Debug, Clone)]
pub struct TenantAuth(pub Account);

impl FromRequestParts<AppState> for TenantAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let ctx = context(parts, state).await;
        let token = bearer_token(parts, &ctx)?;
        match state.accounts().authenticate(&token).await {
            Ok(Some(account)) => Ok(Self(account)),
            Ok(None) => Err(ApiError::unauthorized("unauthorized", "Invalid account token")
                .with_request_id(ctx.request_id)),
            Err(e) => Err(ctx.error(e)),
        }
    }
}
