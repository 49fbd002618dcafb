//! API v1 routes.

mod accounts;
mod nodes;
mod tiers;
mod workloads;

use std::str::FromStr;

use axum::Router;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/nodes", nodes::routes())
        .nest("/tiers", tiers::routes())
        .nest("/accounts", accounts::routes())
        .nest("/workloads", workloads::routes())
}

/// Envelope for list endpoints.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

/// Parses a typed id from a path segment.
fn parse_id<T: FromStr>(raw: &str, kind: &str, ctx: &RequestContext) -> Result<T, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request(format!("invalid_{kind}_id"), format!("Invalid {kind} ID format"))
            .with_request_id(ctx.request_id.clone())
    })
}
