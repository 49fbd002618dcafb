//! The HTTP surface: authentication, status codes and problem bodies.

mod common;

use common::{big_node, small, TestApp, ADMIN_TOKEN, AGENT_TOKEN};
use reqwest::StatusCode;
use serde_json::{json, Value};

fn header_str(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn workload_body(name: &str) -> Value {
    json!({
        "name": name,
        "resources": { "cpus": 2, "memoryMb": 2048, "diskGb": 20, "gpus": 0 },
        "dockerCompose": "services:\n  api:\n    image: nginx\n",
        "publicContainerName": "api",
        "publicContainerPort": 80
    })
}

/// Seeds a node and a tier over HTTP and returns an account token.
async fn seed(app: &TestApp, credits: i64) -> String {
    let resp = app
        .client
        .post(app.url("/v1/nodes/register"))
        .bearer_auth(AGENT_TOKEN)
        .json(&json!({
            "id": fleet_id::NodeId::new().to_string(),
            "hostname": "metal-1",
            "publicIp": "10.0.0.1",
            "token": "node-token",
            "agentVersion": "0.4.0",
            "resources": { "cpus": 8, "memoryMb": 16384, "diskGb": 200, "gpus": 0 }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let node: Value = resp.json().await.unwrap();
    assert!(node.get("token").is_none());

    let resp = app
        .client
        .post(app.url("/v1/tiers"))
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({ "name": "small", "cpus": 2, "memoryMb": 2048, "diskGb": 20, "gpus": 0, "cost": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .client
        .post(app.url("/v1/accounts"))
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({ "name": "acme", "credits": credits }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let account: Value = resp.json().await.unwrap();
    assert!(account.get("tokenHash").is_none());
    account["token"].as_str().expect("missing token").to_string()
}

#[tokio::test]
async fn health_endpoints_need_no_auth() {
    let app = TestApp::spawn().await;
    for path in ["/healthz", "/readyz", "/livez"] {
        let resp = app.client.get(app.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{path}");
    }
}

#[tokio::test]
async fn callers_are_checked_per_route() {
    let app = TestApp::spawn().await;

    let resp = app.client.get(app.url("/v1/workloads")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        header_str(resp.headers(), "content-type").as_deref(),
        Some("application/problem+json")
    );

    // The agent token is not a tenant token.
    let resp = app
        .client
        .get(app.url("/v1/workloads"))
        .bearer_auth(AGENT_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .client
        .post(app.url("/v1/tiers"))
        .bearer_auth(AGENT_TOKEN)
        .json(&json!({ "name": "x", "cpus": 1, "memoryMb": 1, "diskGb": 1, "gpus": 0, "cost": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .client
        .get(app.url("/v1/nodes"))
        .header("Authorization", format!("Token {ADMIN_TOKEN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "invalid_authorization");

    // Tiers are public.
    let resp = app.client.get(app.url("/v1/tiers")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn request_id_is_echoed_in_errors() {
    let app = TestApp::spawn().await;
    let resp = app
        .client
        .get(app.url("/v1/nodes/not-a-node"))
        .bearer_auth(ADMIN_TOKEN)
        .header("x-request-id", "req-itest-1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        header_str(resp.headers(), "x-request-id").as_deref(),
        Some("req-itest-1")
    );
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "invalid_node_id");
    assert_eq!(body["request_id"], "req-itest-1");
}

#[tokio::test]
async fn tenant_workload_lifecycle_over_http() {
    let app = TestApp::spawn().await;
    let token = seed(&app, 100).await;

    let resp = app
        .client
        .post(app.url("/v1/workloads"))
        .bearer_auth(&token)
        .json(&workload_body("web"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let workload: Value = resp.json().await.unwrap();
    let id = workload["id"].as_str().unwrap().to_string();
    assert_eq!(workload["status"], "scheduled");
    assert_eq!(workload["creditRate"], 1);

    let resp = app
        .client
        .post(app.url(&format!("/v1/workloads/{id}/events")))
        .bearer_auth(AGENT_TOKEN)
        .json(&json!({ "kind": "running" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["status"], "running");

    // Tenants cannot report events.
    let resp = app
        .client
        .post(app.url(&format!("/v1/workloads/{id}/events")))
        .bearer_auth(&token)
        .json(&json!({ "kind": "stopped" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .client
        .get(app.url(&format!("/v1/workloads/{id}/events")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let events: Value = resp.json().await.unwrap();
    let kinds: Vec<&str> = events["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, ["created", "running"]);

    let resp = app
        .client
        .get(app.url("/v1/workloads"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let list: Value = resp.json().await.unwrap();
    assert_eq!(list["items"].as_array().unwrap().len(), 1);

    let resp = app
        .client
        .post(app.url(&format!("/v1/workloads/{id}/restart")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(app.agent.calls_for("restart"), 1);

    let resp = app
        .client
        .delete(app.url(&format!("/v1/workloads/{id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .client
        .get(app.url(&format!("/v1/workloads/{id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "workload_not_found");
}

#[tokio::test]
async fn placement_failures_map_to_status_codes() {
    let app = TestApp::spawn().await;
    let token = seed(&app, 5).await;

    let mut odd = workload_body("odd");
    odd["resources"]["cpus"] = json!(3);
    let resp = app
        .client
        .post(app.url("/v1/workloads"))
        .bearer_auth(&token)
        .json(&odd)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "invalid_tier");

    let resp = app
        .client
        .post(app.url("/v1/workloads"))
        .bearer_auth(&token)
        .json(&workload_body("one"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .client
        .post(app.url("/v1/workloads"))
        .bearer_auth(&token)
        .json(&workload_body("two"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "insufficient_credits");
}

#[tokio::test]
async fn no_capacity_is_retryable() {
    let app = TestApp::spawn().await;
    app.create_tier("small", small(), 1).await;
    let account = app.create_account("acme", 100).await;

    let resp = app
        .client
        .post(app.url("/v1/workloads"))
        .bearer_auth(&account.token)
        .json(&workload_body("web"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "no_capacity");
    assert_eq!(body["retryable"], true);
    assert_eq!(body["retry_after_seconds"], 30);
}

#[tokio::test]
async fn agent_rejection_is_unprocessable() {
    let app = TestApp::spawn().await;
    let token = seed(&app, 100).await;
    app.agent
        .fail("create", common::Failure::Rejected("DOMAIN_EXISTS"));

    let resp = app
        .client
        .post(app.url("/v1/workloads"))
        .bearer_auth(&token)
        .json(&workload_body("web"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "domain_conflict");
}

#[tokio::test]
async fn inspection_is_forwarded_to_the_agent() {
    let app = TestApp::spawn().await;
    app.register_node(big_node()).await;
    app.create_tier("small", small(), 1).await;
    let account = app.create_account("acme", 100).await;
    let workload = app
        .state
        .workloads()
        .create(
            &account.account.id,
            common::workload_request("web", small()),
        )
        .await
        .unwrap();
    let base = format!("/v1/workloads/{}", workload.id);

    let resp = app
        .client
        .get(app.url(&format!("{base}/containers/logs?container=api&maxLines=50")))
        .bearer_auth(&account.token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["lines"], json!(["api says hello"]));

    for max_lines in [0, 1001] {
        let resp = app
            .client
            .get(app.url(&format!(
                "{base}/containers/logs?container=api&maxLines={max_lines}"
            )))
            .bearer_auth(&account.token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "maxLines={max_lines}");
    }

    let resp = app
        .client
        .get(app.url(&format!("{base}/system/stats")))
        .bearer_auth(&account.token)
        .send()
        .await
        .unwrap();
    let stats: Value = resp.json().await.unwrap();
    assert_eq!(stats["memory"]["total"], 2048);

    let resp = app
        .client
        .get(app.url(&format!("{base}/containers")))
        .bearer_auth(&account.token)
        .send()
        .await
        .unwrap();
    let containers: Value = resp.json().await.unwrap();
    assert_eq!(containers["items"][0]["state"], "running");

    assert_eq!(app.agent.calls_for("container_logs"), 1);
}

#[tokio::test]
async fn operators_manage_nodes_and_credits() {
    let app = TestApp::spawn().await;
    let node = app.register_node(big_node()).await;
    let account = app.create_account("acme", 0).await;

    let resp = app
        .client
        .post(app.url(&format!("/v1/accounts/{}/credits", account.account.id)))
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({ "amount": 40 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .client
        .get(app.url("/v1/accounts/me"))
        .bearer_auth(&account.token)
        .send()
        .await
        .unwrap();
    let me: Value = resp.json().await.unwrap();
    assert_eq!(me["credits"], 40);

    let resp = app
        .client
        .post(app.url(&format!("/v1/nodes/{}/heartbeat", node.id)))
        .bearer_auth(AGENT_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .client
        .delete(app.url(&format!("/v1/nodes/{}", node.id)))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .client
        .post(app.url(&format!("/v1/nodes/{}/heartbeat", node.id)))
        .bearer_auth(AGENT_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
