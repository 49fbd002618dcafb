//! In-process store used by tests and dev mode.
//!
//! A transaction holds the store-wide mutex from `begin` until it is
//! committed or dropped, so transactions are trivially serializable. Writes
//! go to a private copy of the state that replaces the shared state on
//! commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_events::WorkloadStatus;
use fleet_id::{AccountId, NodeId, TierId, WorkloadId};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::store::{Store, StoreTx};
use super::DbError;
use crate::models::{Account, Node, Resources, Tier, Workload, WorkloadEvent};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    accounts: BTreeMap<AccountId, Account>,
    tiers: BTreeMap<TierId, Tier>,
    nodes: BTreeMap<NodeId, Node>,
    workloads: BTreeMap<WorkloadId, Workload>,
    events: Vec<WorkloadEvent>,
}

/// A store that lives entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DbError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn health_check(&self) -> Result<(), DbError> {
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

fn unique(constraint: &str) -> DbError {
    DbError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_account(&mut self, account: &Account) -> Result<(), DbError> {
        let accounts = &self.working.accounts;
        if accounts.contains_key(&account.id) {
            return Err(unique("accounts_pkey"));
        }
        if accounts.values().any(|a| a.name == account.name) {
            return Err(unique("accounts_name_key"));
        }
        if accounts.values().any(|a| a.token_hash == account.token_hash) {
            return Err(unique("accounts_token_hash_key"));
        }
        self.working.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&mut self, id: &AccountId) -> Result<Option<Account>, DbError> {
        Ok(self.working.accounts.get(id).cloned())
    }

    async fn lock_account(&mut self, id: &AccountId) -> Result<Option<Account>, DbError> {
        // The whole store is already locked for this transaction.
        self.get_account(id).await
    }

    async fn find_account_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<Account>, DbError> {
        Ok(self
            .working
            .accounts
            .values()
            .find(|a| a.token_hash == token_hash)
            .cloned())
    }

    async fn list_accounts(&mut self) -> Result<Vec<Account>, DbError> {
        Ok(self.working.accounts.values().cloned().collect())
    }

    async fn set_account_credits(
        &mut self,
        id: &AccountId,
        credits: i64,
    ) -> Result<bool, DbError> {
        match self.working.accounts.get_mut(id) {
            Some(account) => {
                account.credits = credits;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_tier(&mut self, tier: &Tier) -> Result<(), DbError> {
        let tiers = &self.working.tiers;
        if tiers.contains_key(&tier.id) {
            return Err(unique("tiers_pkey"));
        }
        if tiers.values().any(|t| t.name == tier.name) {
            return Err(unique("tiers_name_key"));
        }
        if tiers.values().any(|t| t.resources == tier.resources) {
            return Err(unique("tiers_shape_key"));
        }
        self.working.tiers.insert(tier.id, tier.clone());
        Ok(())
    }

    async fn list_tiers(&mut self) -> Result<Vec<Tier>, DbError> {
        Ok(self.working.tiers.values().cloned().collect())
    }

    async fn find_tier_by_resources(
        &mut self,
        resources: &Resources,
    ) -> Result<Option<Tier>, DbError> {
        Ok(self
            .working
            .tiers
            .values()
            .find(|t| t.resources == *resources)
            .cloned())
    }

    async fn delete_tier(&mut self, id: &TierId) -> Result<bool, DbError> {
        Ok(self.working.tiers.remove(id).is_some())
    }

    async fn insert_node(&mut self, node: &Node) -> Result<(), DbError> {
        if self.working.nodes.contains_key(&node.id) {
            return Err(unique("nodes_pkey"));
        }
        self.working.nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn update_node(&mut self, node: &Node) -> Result<bool, DbError> {
        match self.working.nodes.get_mut(&node.id) {
            Some(existing) => {
                *existing = node.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_node(&mut self, id: &NodeId) -> Result<Option<Node>, DbError> {
        Ok(self.working.nodes.get(id).cloned())
    }

    async fn list_nodes(&mut self) -> Result<Vec<Node>, DbError> {
        Ok(self.working.nodes.values().cloned().collect())
    }

    async fn list_nodes_seen_since(
        &mut self,
        seen_since: DateTime<Utc>,
    ) -> Result<Vec<Node>, DbError> {
        Ok(self
            .working
            .nodes
            .values()
            .filter(|n| n.last_seen_at >= seen_since)
            .cloned()
            .collect())
    }

    async fn touch_node(&mut self, id: &NodeId, seen_at: DateTime<Utc>) -> Result<bool, DbError> {
        match self.working.nodes.get_mut(id) {
            Some(node) => {
                node.last_seen_at = seen_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_node(&mut self, id: &NodeId) -> Result<bool, DbError> {
        Ok(self.working.nodes.remove(id).is_some())
    }

    async fn active_usage_by_node(&mut self) -> Result<HashMap<NodeId, Resources>, DbError> {
        let mut usage: HashMap<NodeId, Resources> = HashMap::new();
        for workload in self.working.workloads.values() {
            if !workload.status.is_active() {
                continue;
            }
            let entry = usage.entry(workload.node_id).or_default();
            *entry = entry.saturating_add(&workload.resources);
        }
        Ok(usage)
    }

    async fn count_node_workloads(&mut self, id: &NodeId) -> Result<u64, DbError> {
        Ok(self
            .working
            .workloads
            .values()
            .filter(|w| w.node_id == *id)
            .count() as u64)
    }

    async fn insert_workload(&mut self, workload: &Workload) -> Result<(), DbError> {
        let workloads = &self.working.workloads;
        if workloads.contains_key(&workload.id) {
            return Err(unique("workloads_pkey"));
        }
        if workloads.values().any(|w| w.domain == workload.domain) {
            return Err(unique("workloads_domain_key"));
        }
        self.working.workloads.insert(workload.id, workload.clone());
        Ok(())
    }

    async fn get_workload(&mut self, id: &WorkloadId) -> Result<Option<Workload>, DbError> {
        Ok(self.working.workloads.get(id).cloned())
    }

    async fn list_account_workloads(
        &mut self,
        account_id: &AccountId,
    ) -> Result<Vec<Workload>, DbError> {
        Ok(self
            .working
            .workloads
            .values()
            .filter(|w| w.account_id == *account_id)
            .cloned()
            .collect())
    }

    async fn list_active_workloads(&mut self) -> Result<Vec<Workload>, DbError> {
        Ok(self
            .working
            .workloads
            .values()
            .filter(|w| w.status.is_active())
            .cloned()
            .collect())
    }

    async fn set_workload_status(
        &mut self,
        id: &WorkloadId,
        status: WorkloadStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        match self.working.workloads.get_mut(id) {
            Some(workload) => {
                workload.status = status;
                workload.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_workload(&mut self, id: &WorkloadId) -> Result<bool, DbError> {
        let removed = self.working.workloads.remove(id).is_some();
        if removed {
            self.working.events.retain(|e| e.workload_id != *id);
        }
        Ok(removed)
    }

    async fn account_spend_rate(&mut self, account_id: &AccountId) -> Result<i64, DbError> {
        Ok(self
            .working
            .workloads
            .values()
            .filter(|w| w.account_id == *account_id && w.status.is_active())
            .map(|w| w.credit_rate)
            .sum())
    }

    async fn insert_event(&mut self, event: &WorkloadEvent) -> Result<bool, DbError> {
        let duplicate = self.working.events.iter().any(|e| {
            e.workload_id == event.workload_id
                && e.kind.name() == event.kind.name()
                && e.timestamp == event.timestamp
        });
        if duplicate {
            return Ok(false);
        }
        self.working.events.push(event.clone());
        Ok(true)
    }

    async fn list_events(
        &mut self,
        workload_id: &WorkloadId,
    ) -> Result<Vec<WorkloadEvent>, DbError> {
        let mut events: Vec<WorkloadEvent> = self
            .working
            .events
            .iter()
            .filter(|e| e.workload_id == *workload_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_events::WorkloadEventKind;

    fn account(name: &str) -> Account {
        Account {
            id: AccountId::new(),
            name: name.to_string(),
            token_hash: format!("hash-{name}"),
            credits: 100,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&account("acme")).await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.list_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        let acme = account("acme");

        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&acme).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_account(&acme.id).await.unwrap(), Some(acme));
    }

    #[tokio::test]
    async fn test_duplicate_account_name_is_unique_violation() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&account("acme")).await.unwrap();

        let mut dup = account("acme");
        dup.token_hash = "other".into();
        let err = tx.insert_account(&dup).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { constraint } if constraint == "accounts_name_key"));
    }

    #[tokio::test]
    async fn test_events_sorted_by_timestamp_and_deduplicated() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let workload_id = WorkloadId::new();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);

        let late = WorkloadEvent::new(workload_id, WorkloadEventKind::Running, t1);
        let early = WorkloadEvent::new(workload_id, WorkloadEventKind::Starting, t0);
        assert!(tx.insert_event(&late).await.unwrap());
        assert!(tx.insert_event(&early).await.unwrap());

        let replay = WorkloadEvent::new(workload_id, WorkloadEventKind::Running, t1);
        assert!(!tx.insert_event(&replay).await.unwrap());

        let events = tx.list_events(&workload_id).await.unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![WorkloadEventKind::Starting, WorkloadEventKind::Running]
        );
    }
}
