//! HTTP API handlers and routing.

mod auth;
pub mod error;
mod health;
mod request_context;
mod v1;

use axum::{
    http::{header, Method},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    trace::TraceLayer,
};

use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(Any);

    Router::new()
        // Health endpoints (no auth required)
        .merge(health::routes())
        .nest("/v1", v1::routes())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::clients::{DnsZones, HttpAgentClient, LoggingDns};
    use crate::db::MemoryStore;
    use crate::scheduler::FirstSelector;
    use crate::state::AuthConfig;

    fn router() -> Router {
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(HttpAgentClient::new(Default::default()).unwrap()),
            DnsZones::new(
                Arc::new(LoggingDns::new("workloads.test")),
                Arc::new(LoggingDns::new("nodes.test")),
            ),
            Arc::new(FirstSelector),
            AuthConfig {
                admin_token: "admin".to_string(),
                agent_token: "agent".to_string(),
            },
            Duration::from_secs(60),
        );
        create_router(state)
    }

    #[tokio::test]
    async fn test_livez() {
        let request = Request::builder().uri("/livez").body(Body::empty()).unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unauthenticated_request_keeps_request_id() {
        let request = Request::builder()
            .uri("/v1/accounts")
            .header("x-request-id", "req-abc")
            .body(Body::empty())
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["x-request-id"], "req-abc");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let request = Request::builder()
            .uri("/v2/workloads")
            .body(Body::empty())
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
