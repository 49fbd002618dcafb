//! Domain records shared by the store, the core services and the API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fleet_events::{WorkloadEventKind, WorkloadStatus};
use fleet_id::{AccountId, NodeId, TierId, WorkloadEventId, WorkloadId};
use serde::{Deserialize, Serialize};

// =============================================================================
// Resources
// =============================================================================

/// A resource shape: what a tier grants and what a workload claims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    pub cpus: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
    pub gpus: u32,
}

impl Resources {
    pub fn new(cpus: u32, memory_mb: u32, disk_gb: u32, gpus: u32) -> Self {
        Self {
            cpus,
            memory_mb,
            disk_gb,
            gpus,
        }
    }

    /// Component-wise sum, saturating at `u32::MAX`.
    #[must_use]
    pub fn saturating_add(&self, other: &Resources) -> Resources {
        Resources {
            cpus: self.cpus.saturating_add(other.cpus),
            memory_mb: self.memory_mb.saturating_add(other.memory_mb),
            disk_gb: self.disk_gb.saturating_add(other.disk_gb),
            gpus: self.gpus.saturating_add(other.gpus),
        }
    }
}

/// Capacity a node holds back for its own operating system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reserved {
    pub cpus: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
}

// =============================================================================
// Accounts
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    /// SHA-256 of the account's API token; the token itself is never stored.
    #[serde(skip)]
    pub token_hash: String,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Tiers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub id: TierId,
    pub name: String,
    #[serde(flatten)]
    pub resources: Resources,
    /// Credits burned per minute by a workload of this tier.
    pub cost: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Nodes
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub hostname: String,
    pub public_ip: String,
    /// Bearer token the control plane presents to this node's agent.
    #[serde(skip)]
    pub token: String,
    pub agent_version: String,
    /// Declared totals. `gpus` is the number of GPUs on the host.
    pub resources: Resources,
    pub reserved: Reserved,
    pub gpu_model: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a node agent reports about itself when registering.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistration {
    pub id: NodeId,
    pub hostname: String,
    pub public_ip: String,
    pub token: String,
    pub agent_version: String,
    pub resources: Resources,
    #[serde(default)]
    pub reserved: Reserved,
    #[serde(default)]
    pub gpu_model: Option<String>,
}

// =============================================================================
// Workloads
// =============================================================================

/// Registry credentials the agent needs to pull private images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerCredentials {
    pub server: String,
    pub username: String,
    pub password: String,
}

/// The container payload of a workload.
///
/// The control plane stores it and forwards it to the agent; it never
/// interprets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub docker_compose: String,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    /// File name to base64-encoded contents.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub docker_credentials: Vec<DockerCredentials>,
    pub public_container_name: String,
    pub public_container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub id: WorkloadId,
    pub account_id: AccountId,
    pub node_id: NodeId,
    pub name: String,
    pub resources: Resources,
    pub credit_rate: i64,
    pub status: WorkloadStatus,
    pub domain: String,
    #[serde(skip)]
    pub spec: WorkloadSpec,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tenant's request to run a workload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkload {
    pub name: String,
    pub resources: Resources,
    /// Custom public domain. When absent one is generated in the workloads zone.
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(flatten)]
    pub spec: WorkloadSpec,
}

// =============================================================================
// Workload Events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadEvent {
    pub id: WorkloadEventId,
    pub workload_id: WorkloadId,
    #[serde(flatten)]
    pub kind: WorkloadEventKind,
    pub timestamp: DateTime<Utc>,
}

impl WorkloadEvent {
    pub fn new(workload_id: WorkloadId, kind: WorkloadEventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: WorkloadEventId::new(),
            workload_id,
            kind,
            timestamp,
        }
    }
}
