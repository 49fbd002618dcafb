#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_control_plane::{
    accounts::{CreateAccount, CreatedAccount},
    api,
    clients::{
        agent::{Container, ContainerLogsQuery, CpuStats, MemoryStats, SystemLogsQuery, SystemStats},
        AgentClient, AgentError, AgentErrorKind, DnsZones, LoggingDns,
    },
    db::MemoryStore,
    models::{CreateWorkload, Node, NodeRegistration, Resources, Tier, Workload, WorkloadSpec},
    scheduler::{CreateTier, FirstSelector},
    state::{AppState, AuthConfig},
};
use fleet_id::{NodeId, WorkloadId};
use tokio::net::TcpListener;

pub const ADMIN_TOKEN: &str = "admin-secret";
pub const AGENT_TOKEN: &str = "agent-secret";
pub const WORKLOADS_ZONE: &str = "workloads.test";
pub const NODES_ZONE: &str = "nodes.test";

/// A scripted failure for one agent operation.
#[derive(Debug, Clone)]
pub enum Failure {
    Rejected(&'static str),
    Unavailable,
}

impl Failure {
    fn to_error(&self) -> AgentError {
        match self {
            Self::Rejected(code) => AgentError::Rejected {
                status: 400,
                kind: AgentErrorKind::from_code(code),
                message: format!("rejected: {code}"),
            },
            Self::Unavailable => AgentError::UnexpectedStatus {
                status: 503,
                body: "unavailable".to_string(),
            },
        }
    }
}

/// In-process stand-in for node agents.
///
/// Records every call as `"{op} {workload_id}"` and fails the operations it
/// was told to.
#[derive(Default)]
pub struct FakeAgent {
    calls: Mutex<Vec<String>>,
    failures: Mutex<Vec<(&'static str, Failure)>>,
}

impl FakeAgent {
    pub fn fail(&self, op: &'static str, failure: Failure) {
        self.failures.lock().unwrap().push((op, failure));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    fn record(&self, op: &'static str, id: &WorkloadId) -> Result<(), AgentError> {
        self.calls.lock().unwrap().push(format!("{op} {id}"));
        let failures = self.failures.lock().unwrap();
        match failures.iter().find(|(name, _)| *name == op) {
            Some((_, failure)) => Err(failure.to_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AgentClient for FakeAgent {
    async fn create_workload(&self, _node: &Node, workload: &Workload) -> Result<(), AgentError> {
        self.record("create", &workload.id)
    }

    async fn delete_workload(&self, _node: &Node, id: &WorkloadId) -> Result<(), AgentError> {
        self.record("delete", id)
    }

    async fn start_workload(&self, _node: &Node, id: &WorkloadId) -> Result<(), AgentError> {
        self.record("start", id)
    }

    async fn stop_workload(&self, _node: &Node, id: &WorkloadId) -> Result<(), AgentError> {
        self.record("stop", id)
    }

    async fn restart_workload(&self, _node: &Node, id: &WorkloadId) -> Result<(), AgentError> {
        self.record("restart", id)
    }

    async fn list_containers(&self, _node: &Node, id: &WorkloadId) -> Result<Vec<Container>, AgentError> {
        self.record("containers", id)?;
        Ok(vec![Container {
            names: vec!["/api".to_string()],
            image: "nginx:latest".to_string(),
            image_id: "sha256:abc".to_string(),
            state: "running".to_string(),
        }])
    }

    async fn container_logs(
        &self,
        _node: &Node,
        id: &WorkloadId,
        query: &ContainerLogsQuery,
    ) -> Result<Vec<String>, AgentError> {
        self.record("container_logs", id)?;
        Ok(vec![format!("{} says hello", query.container)])
    }

    async fn system_logs(
        &self,
        _node: &Node,
        id: &WorkloadId,
        _query: &SystemLogsQuery,
    ) -> Result<Vec<String>, AgentError> {
        self.record("system_logs", id)?;
        Ok(vec!["booted".to_string()])
    }

    async fn system_stats(&self, _node: &Node, id: &WorkloadId) -> Result<SystemStats, AgentError> {
        self.record("system_stats", id)?;
        Ok(SystemStats {
            memory: MemoryStats {
                total: 2048,
                used: 512,
            },
            cpus: vec![CpuStats {
                name: "cpu0".to_string(),
                usage: 12.5,
                frequency: 2400,
            }],
            disks: vec![],
        })
    }
}

pub struct TestApp {
    pub state: AppState,
    pub agent: Arc<FakeAgent>,
    pub workloads_dns: Arc<LoggingDns>,
    pub nodes_dns: Arc<LoggingDns>,
    pub base_url: String,
    pub client: reqwest::Client,
}

impl TestApp {
    /// Wires the control plane over an in-memory store and serves it on an
    /// ephemeral port.
    pub async fn spawn() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,fleet_control_plane=debug".into()),
            )
            .with_test_writer()
            .try_init();

        let agent = Arc::new(FakeAgent::default());
        let workloads_dns = Arc::new(LoggingDns::new(WORKLOADS_ZONE));
        let nodes_dns = Arc::new(LoggingDns::new(NODES_ZONE));

        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            agent.clone(),
            DnsZones::new(workloads_dns.clone(), nodes_dns.clone()),
            Arc::new(FirstSelector),
            AuthConfig {
                admin_token: ADMIN_TOKEN.to_string(),
                agent_token: AGENT_TOKEN.to_string(),
            },
            Duration::from_secs(120),
        );

        let app = api::create_router(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            agent,
            workloads_dns,
            nodes_dns,
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn register_node(&self, resources: Resources) -> Node {
        self.state
            .nodes()
            .register(NodeRegistration {
                id: NodeId::new(),
                hostname: "metal-1".to_string(),
                public_ip: "10.0.0.1".to_string(),
                token: "node-token".to_string(),
                agent_version: "0.4.0".to_string(),
                resources,
                reserved: Default::default(),
                gpu_model: None,
            })
            .await
            .unwrap()
    }

    pub async fn create_tier(&self, name: &str, resources: Resources, cost: i64) -> Tier {
        self.state
            .tiers()
            .create(CreateTier {
                name: name.to_string(),
                resources,
                cost,
            })
            .await
            .unwrap()
    }

    pub async fn create_account(&self, name: &str, credits: i64) -> CreatedAccount {
        self.state
            .accounts()
            .create(CreateAccount {
                name: name.to_string(),
                credits,
            })
            .await
            .unwrap()
    }
}

pub fn small() -> Resources {
    Resources::new(2, 2048, 20, 0)
}

pub fn big_node() -> Resources {
    Resources::new(8, 16384, 200, 0)
}

pub fn workload_request(name: &str, resources: Resources) -> CreateWorkload {
    CreateWorkload {
        name: name.to_string(),
        resources,
        domain: None,
        spec: WorkloadSpec {
            docker_compose: "services:\n  api:\n    image: nginx\n".to_string(),
            public_container_name: "api".to_string(),
            public_container_port: 80,
            ..Default::default()
        },
    }
}
