//! Node capacity registry.
//!
//! Tracks the fleet's nodes, their declared and reserved capacity and their
//! liveness. Free capacity is never cached: it is recomputed from a single
//! aggregate over the workloads table inside the caller's transaction.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fleet_id::NodeId;
use tracing::{info, instrument, warn};

use crate::clients::{DnsError, DnsZones, RecordType};
use crate::db::{Store, StoreTx};
use crate::error::{CoreError, CoreResult};
use crate::models::{Node, NodeRegistration, Resources};

// =============================================================================
// Free capacity
// =============================================================================

/// Capacity left on a node after reservations and active workloads.
///
/// Signed so that an over-committed node shows as negative instead of
/// wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeCapacity {
    pub cpus: i64,
    pub memory_mb: i64,
    pub disk_gb: i64,
    pub gpus: i64,
}

impl FreeCapacity {
    pub fn of(node: &Node, used: &Resources) -> Self {
        let declared = &node.resources;
        let reserved = &node.reserved;
        Self {
            cpus: i64::from(declared.cpus) - i64::from(reserved.cpus) - i64::from(used.cpus),
            memory_mb: i64::from(declared.memory_mb)
                - i64::from(reserved.memory_mb)
                - i64::from(used.memory_mb),
            disk_gb: i64::from(declared.disk_gb)
                - i64::from(reserved.disk_gb)
                - i64::from(used.disk_gb),
            gpus: i64::from(declared.gpus) - i64::from(used.gpus),
        }
    }

    /// Whether `request` fits.
    ///
    /// CPU, memory and disk must be strictly greater than the request; GPUs
    /// only need to cover it.
    pub fn fits(&self, request: &Resources) -> bool {
        self.cpus > i64::from(request.cpus)
            && self.memory_mb > i64::from(request.memory_mb)
            && self.disk_gb > i64::from(request.disk_gb)
            && self.gpus >= i64::from(request.gpus)
    }
}

/// Every live node with room for `request`.
///
/// A node is live if it was seen at or after `seen_since`. Must run inside
/// the transaction that will insert the placed workload.
pub async fn find_candidates(
    tx: &mut dyn StoreTx,
    request: &Resources,
    seen_since: DateTime<Utc>,
) -> CoreResult<Vec<Node>> {
    let nodes = tx.list_nodes_seen_since(seen_since).await?;
    let usage = tx.active_usage_by_node().await?;

    Ok(nodes
        .into_iter()
        .filter(|node| {
            let used = usage.get(&node.id).copied().unwrap_or_default();
            FreeCapacity::of(node, &used).fits(request)
        })
        .collect())
}

// =============================================================================
// Registry
// =============================================================================

/// Registration, liveness and removal of nodes.
#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn Store>,
    dns: DnsZones,
    liveness: Duration,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn Store>, dns: DnsZones, liveness: Duration) -> Self {
        Self {
            store,
            dns,
            liveness,
        }
    }

    /// How recently a node must have been seen to receive placements.
    pub fn liveness(&self) -> Duration {
        self.liveness
    }

    /// Creates a node, or refreshes an existing node's declared state.
    ///
    /// Either way the node's A record is brought in line with its address,
    /// so a failed record write is repaired by the next registration.
    #[instrument(skip(self, registration), fields(node_id = %registration.id))]
    pub async fn register(&self, registration: NodeRegistration) -> CoreResult<Node> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let (node, created) = match tx.get_node(&registration.id).await? {
            Some(existing) => {
                let node = Node {
                    hostname: registration.hostname,
                    public_ip: registration.public_ip,
                    token: registration.token,
                    agent_version: registration.agent_version,
                    resources: registration.resources,
                    reserved: registration.reserved,
                    gpu_model: registration.gpu_model,
                    last_seen_at: now,
                    updated_at: now,
                    ..existing
                };
                tx.update_node(&node).await?;
                (node, false)
            }
            None => {
                let node = Node {
                    id: registration.id,
                    hostname: registration.hostname,
                    public_ip: registration.public_ip,
                    token: registration.token,
                    agent_version: registration.agent_version,
                    resources: registration.resources,
                    reserved: registration.reserved,
                    gpu_model: registration.gpu_model,
                    last_seen_at: now,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_node(&node).await?;
                (node, true)
            }
        };
        tx.commit().await?;

        self.point_record(&node).await?;

        info!(
            hostname = %node.hostname,
            created,
            cpus = node.resources.cpus,
            memory_mb = node.resources.memory_mb,
            gpus = node.resources.gpus,
            "Node registered"
        );
        Ok(node)
    }

    /// Creates the node's A record, replacing one that points elsewhere.
    async fn point_record(&self, node: &Node) -> CoreResult<()> {
        let name = DnsZones::node_record_name(&node.id);
        match self
            .dns
            .nodes
            .create_record(&name, &node.public_ip, RecordType::A)
            .await
        {
            Err(DnsError::Conflict { existing, .. }) => {
                info!(old_ip = %existing, new_ip = %node.public_ip, "Node address changed");
                self.dns.nodes.delete_record(&name, RecordType::A).await?;
                self.dns
                    .nodes
                    .create_record(&name, &node.public_ip, RecordType::A)
                    .await?;
                Ok(())
            }
            other => Ok(other?),
        }
    }

    /// Refreshes a node's liveness.
    pub async fn heartbeat(&self, id: &NodeId) -> CoreResult<()> {
        let mut tx = self.store.begin().await?;
        if !tx.touch_node(id, Utc::now()).await? {
            return Err(CoreError::not_found("node", id));
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: &NodeId) -> CoreResult<Node> {
        let mut tx = self.store.begin().await?;
        tx.get_node(id)
            .await?
            .ok_or_else(|| CoreError::not_found("node", id))
    }

    pub async fn list(&self) -> CoreResult<Vec<Node>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_nodes().await?)
    }

    /// Deletes a node that owns no workloads, of any status.
    #[instrument(skip(self), fields(node_id = %id))]
    pub async fn remove(&self, id: &NodeId) -> CoreResult<()> {
        let mut tx = self.store.begin().await?;
        if tx.get_node(id).await?.is_none() {
            return Err(CoreError::not_found("node", id));
        }
        if tx.count_node_workloads(id).await? > 0 {
            return Err(CoreError::NodeBusy(*id));
        }
        tx.delete_node(id).await?;
        tx.commit().await?;

        if let Err(e) = self
            .dns
            .nodes
            .delete_record(&DnsZones::node_record_name(id), RecordType::A)
            .await
        {
            warn!(error = %e, "Failed to delete node DNS record");
        }

        info!("Node removed");
        Ok(())
    }
}
