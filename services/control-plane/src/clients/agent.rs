//! Client for the workload agent running on each node.
//!
//! The agent exposes a JSON API under `/api/v1/workloads`. Every request is
//! authenticated with the node's bearer token. Failures come back as
//! `{"message": ..., "errorCode": ...}` bodies with an UPPER_SNAKE code.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use fleet_id::WorkloadId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{DockerCredentials, Node, Workload};

// =============================================================================
// Errors
// =============================================================================

/// Machine-readable reason an agent refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentErrorKind {
    /// The compose file or another part of the payload was rejected.
    MalformedSpec,
    /// The requested domain is already served by the node.
    DomainConflict,
    /// The node cannot fit the workload.
    ResourceLimit,
    /// The agent refused the domain itself.
    InvalidDomain,
    /// Any other code, kept verbatim.
    Other(String),
}

impl AgentErrorKind {
    /// Maps the agent's `errorCode` onto a kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "MALFORMED_REQUEST" | "DOCKER_COMPOSE" | "INVALID_DOCKER_COMPOSE" => {
                Self::MalformedSpec
            }
            "DOMAIN_EXISTS" => Self::DomainConflict,
            "RESOURCE_LIMIT" | "INSUFFICIENT_RESOURCES" => Self::ResourceLimit,
            "INVALID_DOMAIN" => Self::InvalidDomain,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this rejection is caused by the request rather than the agent.
    ///
    /// These are reported to the tenant as a typed placement failure; every
    /// other kind is an upstream fault.
    pub fn is_request_fault(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::MalformedSpec => "malformed_spec",
            Self::DomainConflict => "domain_conflict",
            Self::ResourceLimit => "resource_limit",
            Self::InvalidDomain => "invalid_domain",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from talking to a node agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent answered with a structured error.
    #[error("agent rejected request ({status}, {kind}): {message}")]
    Rejected {
        status: u16,
        kind: AgentErrorKind,
        message: String,
    },

    /// The agent does not know the workload.
    #[error("workload not found on agent")]
    NotFound,

    /// The agent answered with an error status and no parseable body.
    #[error("agent returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The request never completed.
    #[error("agent request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AgentError {
    /// Whether the request timed out. The agent may still have acted on it.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// The agent keys workloads by UUID; ours carry the same 128 bits as a ULID.
pub fn agent_workload_id(id: &WorkloadId) -> Uuid {
    Uuid::from_u128(u128::from(id.ulid()))
}

/// Body of `POST /api/v1/workloads/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkloadRequest {
    pub id: Uuid,
    pub docker_compose: String,
    pub env_vars: BTreeMap<String, String>,
    pub files: BTreeMap<String, String>,
    pub docker_credentials: Vec<DockerCredentials>,
    pub public_container_name: String,
    pub public_container_port: u16,
    pub memory_mb: u32,
    pub cpus: u32,
    pub gpus: u32,
    pub disk_space_gb: u32,
    pub domain: String,
}

impl From<&Workload> for CreateWorkloadRequest {
    fn from(workload: &Workload) -> Self {
        let spec = &workload.spec;
        Self {
            id: agent_workload_id(&workload.id),
            docker_compose: spec.docker_compose.clone(),
            env_vars: spec.env_vars.clone(),
            files: spec.files.clone(),
            docker_credentials: spec.docker_credentials.clone(),
            public_container_name: spec.public_container_name.clone(),
            public_container_port: spec.public_container_port,
            memory_mb: workload.resources.memory_mb,
            cpus: workload.resources.cpus,
            gpus: workload.resources.gpus,
            disk_space_gb: workload.resources.disk_gb,
            domain: workload.domain.clone(),
        }
    }
}

/// Body of the id-only workload actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadIdRequest {
    pub id: Uuid,
}

impl From<&WorkloadId> for WorkloadIdRequest {
    fn from(id: &WorkloadId) -> Self {
        Self {
            id: agent_workload_id(id),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    message: String,
    error_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub names: Vec<String>,
    pub image: String,
    pub image_id: String,
    pub state: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputStream {
    #[default]
    Stdout,
    Stderr,
}

/// Query for `GET .../containers/logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerLogsQuery {
    pub container: String,
    #[serde(default)]
    pub tail: bool,
    #[serde(default)]
    pub stream: OutputStream,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

/// Query for `GET .../system/logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemLogsQuery {
    #[serde(default)]
    pub tail: bool,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

impl Default for SystemLogsQuery {
    fn default() -> Self {
        Self {
            tail: false,
            max_lines: default_max_lines(),
        }
    }
}

/// The agent caps log requests at this many lines.
pub const MAX_LOG_LINES: usize = 1000;

fn default_max_lines() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogsResponse {
    lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub memory: MemoryStats,
    pub cpus: Vec<CpuStats>,
    #[serde(default)]
    pub disks: Vec<DiskStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    pub name: String,
    pub usage: f32,
    pub frequency: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskStats {
    pub name: String,
    pub mount_point: String,
    pub filesystem: String,
    pub size: u64,
    pub used: u64,
}

// =============================================================================
// Client trait
// =============================================================================

/// Remote operations on the agent of one node.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn create_workload(&self, node: &Node, workload: &Workload) -> Result<(), AgentError>;

    /// Deletes a workload. A workload the agent does not know counts as deleted.
    async fn delete_workload(&self, node: &Node, id: &WorkloadId) -> Result<(), AgentError>;

    async fn start_workload(&self, node: &Node, id: &WorkloadId) -> Result<(), AgentError>;

    async fn stop_workload(&self, node: &Node, id: &WorkloadId) -> Result<(), AgentError>;

    async fn restart_workload(&self, node: &Node, id: &WorkloadId) -> Result<(), AgentError>;

    async fn list_containers(
        &self,
        node: &Node,
        id: &WorkloadId,
    ) -> Result<Vec<Container>, AgentError>;

    async fn container_logs(
        &self,
        node: &Node,
        id: &WorkloadId,
        query: &ContainerLogsQuery,
    ) -> Result<Vec<String>, AgentError>;

    async fn system_logs(
        &self,
        node: &Node,
        id: &WorkloadId,
        query: &SystemLogsQuery,
    ) -> Result<Vec<String>, AgentError>;

    async fn system_stats(&self, node: &Node, id: &WorkloadId) -> Result<SystemStats, AgentError>;
}

// =============================================================================
// HTTP implementation
// =============================================================================

/// Settings for [`HttpAgentClient`].
#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    /// `http` or `https`.
    pub scheme: String,
    pub port: u16,
    pub timeout: Duration,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            port: 443,
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`AgentClient`] over the agent's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    config: AgentClientConfig,
}

impl HttpAgentClient {
    pub fn new(config: AgentClientConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, node: &Node, path: &str) -> String {
        format!(
            "{}://{}:{}/api/v1/workloads/{}",
            self.config.scheme, node.public_ip, self.config.port, path
        )
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        node: &Node,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, AgentError> {
        let url = self.url(node, path);
        debug!(node_id = %node.id, url = %url, "Calling agent");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&node.token)
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }

    async fn get<Q: Serialize + ?Sized>(
        &self,
        node: &Node,
        path: &str,
        query: &Q,
    ) -> Result<reqwest::Response, AgentError> {
        let url = self.url(node, path);
        debug!(node_id = %node.id, url = %url, "Calling agent");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&node.token)
            .query(query)
            .send()
            .await?;
        check_status(response).await
    }
}

const NO_QUERY: &[(&str, &str)] = &[];

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AgentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(AgentError::NotFound);
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => {
            warn!(status = %status, code = %err.error_code, message = %err.message, "Agent rejected request");
            Err(AgentError::Rejected {
                status: status.as_u16(),
                kind: AgentErrorKind::from_code(&err.error_code),
                message: err.message,
            })
        }
        Err(_) => {
            warn!(status = %status, body = %body, "Agent returned unexpected error");
            Err(AgentError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn create_workload(&self, node: &Node, workload: &Workload) -> Result<(), AgentError> {
        let request = CreateWorkloadRequest::from(workload);
        self.post(node, "create", &request).await?;
        Ok(())
    }

    async fn delete_workload(&self, node: &Node, id: &WorkloadId) -> Result<(), AgentError> {
        match self.post(node, "delete", &WorkloadIdRequest::from(id)).await {
            Ok(_) | Err(AgentError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn start_workload(&self, node: &Node, id: &WorkloadId) -> Result<(), AgentError> {
        self.post(node, "start", &WorkloadIdRequest::from(id)).await?;
        Ok(())
    }

    async fn stop_workload(&self, node: &Node, id: &WorkloadId) -> Result<(), AgentError> {
        self.post(node, "stop", &WorkloadIdRequest::from(id)).await?;
        Ok(())
    }

    async fn restart_workload(&self, node: &Node, id: &WorkloadId) -> Result<(), AgentError> {
        self.post(node, "restart", &WorkloadIdRequest::from(id))
            .await?;
        Ok(())
    }

    async fn list_containers(
        &self,
        node: &Node,
        id: &WorkloadId,
    ) -> Result<Vec<Container>, AgentError> {
        let response = self
            .get(node, &format!("{}/containers/list", agent_workload_id(id)), NO_QUERY)
            .await?;
        Ok(response.json().await?)
    }

    async fn container_logs(
        &self,
        node: &Node,
        id: &WorkloadId,
        query: &ContainerLogsQuery,
    ) -> Result<Vec<String>, AgentError> {
        let response = self
            .get(node, &format!("{}/containers/logs", agent_workload_id(id)), query)
            .await?;
        let logs: LogsResponse = response.json().await?;
        Ok(logs.lines)
    }

    async fn system_logs(
        &self,
        node: &Node,
        id: &WorkloadId,
        query: &SystemLogsQuery,
    ) -> Result<Vec<String>, AgentError> {
        let response = self.get(node, &format!("{}/system/logs", agent_workload_id(id)), query).await?;
        let logs: LogsResponse = response.json().await?;
        Ok(logs.lines)
    }

    async fn system_stats(&self, node: &Node, id: &WorkloadId) -> Result<SystemStats, AgentError> {
        let response = self.get(node, &format!("{}/system/stats", agent_workload_id(id)), NO_QUERY).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("MALFORMED_REQUEST", AgentErrorKind::MalformedSpec)]
    #[case("INVALID_DOCKER_COMPOSE", AgentErrorKind::MalformedSpec)]
    #[case("DOMAIN_EXISTS", AgentErrorKind::DomainConflict)]
    #[case("INSUFFICIENT_RESOURCES", AgentErrorKind::ResourceLimit)]
    #[case("INVALID_DOMAIN", AgentErrorKind::InvalidDomain)]
    #[case("INTERNAL", AgentErrorKind::Other("INTERNAL".into()))]
    fn test_error_code_mapping(#[case] code: &str, #[case] expected: AgentErrorKind) {
        assert_eq!(AgentErrorKind::from_code(code), expected);
    }

    #[test]
    fn test_only_known_kinds_are_request_faults() {
        assert!(AgentErrorKind::DomainConflict.is_request_fault());
        assert!(!AgentErrorKind::Other("INTERNAL".into()).is_request_fault());
    }

    #[test]
    fn test_agent_id_keeps_the_ulid_bits() {
        let id = WorkloadId::new();
        let uuid = agent_workload_id(&id);
        assert_eq!(uuid.as_u128(), u128::from(id.ulid()));
        assert_eq!(WorkloadIdRequest::from(&id).id, uuid);
    }

    #[test]
    fn test_logs_query_defaults() {
        let query: ContainerLogsQuery =
            serde_json::from_value(serde_json::json!({"container": "api"})).unwrap();
        assert_eq!(query.stream, OutputStream::Stdout);
        assert_eq!(query.max_lines, 100);
        assert!(!query.tail);
    }
}
