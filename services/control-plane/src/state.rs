//! Application state shared across request handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::accounts::AccountService;
use crate::clients::{AgentClient, DnsZones};
use crate::db::Store;
use crate::metering::MeteringService;
use crate::nodes::NodeRegistry;
use crate::scheduler::{NodeSelector, TierCatalog};
use crate::workloads::WorkloadService;

/// Bearer tokens for the two non-tenant callers.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Operators: node removal, tiers, accounts.
    pub admin_token: String,
    /// Node agents: registration, heartbeats, events.
    pub agent_token: String,
}

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn Store>,
    auth: AuthConfig,
    accounts: AccountService,
    tiers: TierCatalog,
    nodes: NodeRegistry,
    workloads: WorkloadService,
    metering: MeteringService,
}

impl AppState {
    /// Wires the core services over one store.
    pub fn new(
        store: Arc<dyn Store>,
        agent: Arc<dyn AgentClient>,
        dns: DnsZones,
        selector: Arc<dyn NodeSelector>,
        auth: AuthConfig,
        node_liveness: Duration,
    ) -> Self {
        let liveness = chrono::Duration::from_std(node_liveness)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let workloads = WorkloadService::new(
            store.clone(),
            agent,
            dns.clone(),
            selector,
            liveness,
        );
        Self {
            inner: Arc::new(AppStateInner {
                accounts: AccountService::new(store.clone()),
                tiers: TierCatalog::new(store.clone()),
                nodes: NodeRegistry::new(store.clone(), dns, liveness),
                metering: MeteringService::new(store.clone(), workloads.clone()),
                workloads,
                store,
                auth,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.inner.auth
    }

    pub fn accounts(&self) -> &AccountService {
        &self.inner.accounts
    }

    pub fn tiers(&self) -> &TierCatalog {
        &self.inner.tiers
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.inner.nodes
    }

    pub fn workloads(&self) -> &WorkloadService {
        &self.inner.workloads
    }

    pub fn metering(&self) -> &MeteringService {
        &self.inner.metering
    }
}
