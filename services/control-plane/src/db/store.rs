//! The unit-of-work contract between the core and persistence.
//!
//! Every core operation runs against a [`StoreTx`] obtained from
//! [`Store::begin`]. Writes become visible only after [`StoreTx::commit`];
//! dropping a transaction without committing rolls it back.
//!
//! Implementations must give each transaction serializable semantics: two
//! concurrent placements may not both observe the same free capacity or the
//! same credit headroom.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_events::WorkloadStatus;
use fleet_id::{AccountId, NodeId, TierId, WorkloadId};

use super::DbError;
use crate::models::{Account, Node, Resources, Tier, Workload, WorkloadEvent};

/// A transactional store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a new serializable transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DbError>;

    /// Checks that the backing store is reachable.
    async fn health_check(&self) -> Result<(), DbError>;
}

/// One open transaction.
#[async_trait]
pub trait StoreTx: Send {
    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    async fn insert_account(&mut self, account: &Account) -> Result<(), DbError>;

    async fn get_account(&mut self, id: &AccountId) -> Result<Option<Account>, DbError>;

    /// Reads an account and holds a write lock on it until the transaction ends.
    async fn lock_account(&mut self, id: &AccountId) -> Result<Option<Account>, DbError>;

    async fn find_account_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<Account>, DbError>;

    async fn list_accounts(&mut self) -> Result<Vec<Account>, DbError>;

    /// Overwrites an account's balance. Returns false if the account is unknown.
    async fn set_account_credits(&mut self, id: &AccountId, credits: i64)
        -> Result<bool, DbError>;

    // -------------------------------------------------------------------------
    // Tiers
    // -------------------------------------------------------------------------

    async fn insert_tier(&mut self, tier: &Tier) -> Result<(), DbError>;

    async fn list_tiers(&mut self) -> Result<Vec<Tier>, DbError>;

    /// The tier whose shape equals `resources` exactly.
    async fn find_tier_by_resources(
        &mut self,
        resources: &Resources,
    ) -> Result<Option<Tier>, DbError>;

    async fn delete_tier(&mut self, id: &TierId) -> Result<bool, DbError>;

    // -------------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------------

    async fn insert_node(&mut self, node: &Node) -> Result<(), DbError>;

    /// Overwrites every mutable column of an existing node.
    async fn update_node(&mut self, node: &Node) -> Result<bool, DbError>;

    async fn get_node(&mut self, id: &NodeId) -> Result<Option<Node>, DbError>;

    async fn list_nodes(&mut self) -> Result<Vec<Node>, DbError>;

    /// Nodes whose `last_seen_at` is at or after `seen_since`.
    async fn list_nodes_seen_since(
        &mut self,
        seen_since: DateTime<Utc>,
    ) -> Result<Vec<Node>, DbError>;

    async fn touch_node(&mut self, id: &NodeId, seen_at: DateTime<Utc>) -> Result<bool, DbError>;

    async fn delete_node(&mut self, id: &NodeId) -> Result<bool, DbError>;

    /// Resources claimed on each node by its non-stopped workloads.
    ///
    /// This is the single aggregate read placement relies on. Nodes without
    /// active workloads are absent from the map.
    async fn active_usage_by_node(&mut self) -> Result<HashMap<NodeId, Resources>, DbError>;

    /// Workloads of any status assigned to a node.
    async fn count_node_workloads(&mut self, id: &NodeId) -> Result<u64, DbError>;

    // -------------------------------------------------------------------------
    // Workloads
    // -------------------------------------------------------------------------

    async fn insert_workload(&mut self, workload: &Workload) -> Result<(), DbError>;

    async fn get_workload(&mut self, id: &WorkloadId) -> Result<Option<Workload>, DbError>;

    async fn list_account_workloads(
        &mut self,
        account_id: &AccountId,
    ) -> Result<Vec<Workload>, DbError>;

    /// Every workload whose status is not `stopped`.
    async fn list_active_workloads(&mut self) -> Result<Vec<Workload>, DbError>;

    async fn set_workload_status(
        &mut self,
        id: &WorkloadId,
        status: WorkloadStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    /// Deletes a workload together with its events.
    async fn delete_workload(&mut self, id: &WorkloadId) -> Result<bool, DbError>;

    /// Sum of `credit_rate` over an account's non-stopped workloads.
    async fn account_spend_rate(&mut self, account_id: &AccountId) -> Result<i64, DbError>;

    // -------------------------------------------------------------------------
    // Workload Events
    // -------------------------------------------------------------------------

    /// Appends an event. Returns false if an event with the same workload,
    /// kind and timestamp already exists.
    async fn insert_event(&mut self, event: &WorkloadEvent) -> Result<bool, DbError>;

    /// A workload's events in timestamp order, insertion order breaking ties.
    async fn list_events(&mut self, workload_id: &WorkloadId)
        -> Result<Vec<WorkloadEvent>, DbError>;

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    async fn commit(self: Box<Self>) -> Result<(), DbError>;
}
