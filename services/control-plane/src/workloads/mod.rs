//! Workload lifecycle.
//!
//! Creation places the workload inside one transaction (tier match,
//! admission, candidate search, selection, insert) and only then talks to
//! the node's agent and to DNS. If either remote step fails, the steps that
//! already happened are undone and the row is removed again. An agent
//! timeout is the exception: the outcome is unknown, so the row is kept.
//!
//! Status is never written directly by tenants: it is derived from the
//! append-only event log (see [`events`]).

mod events;
mod remote;

pub use events::SubmitEvent;

use std::sync::Arc;

use chrono::{Duration, Utc};
use fleet_events::{WorkloadEventKind, WorkloadStatus};
use fleet_id::{AccountId, WorkloadId};
use tracing::{error, info, instrument, warn};

use crate::clients::{AgentClient, DnsZones, RecordType};
use crate::db::{Store, StoreTx};
use crate::error::{CoreError, CoreResult};
use crate::models::{CreateWorkload, Node, Workload, WorkloadEvent};
use crate::nodes::find_candidates;
use crate::scheduler::{check_admission, match_tier, NodeSelector};

#[derive(Clone)]
pub struct WorkloadService {
    store: Arc<dyn Store>,
    agent: Arc<dyn AgentClient>,
    dns: DnsZones,
    selector: Arc<dyn NodeSelector>,
    liveness: Duration,
}

impl WorkloadService {
    pub fn new(
        store: Arc<dyn Store>,
        agent: Arc<dyn AgentClient>,
        dns: DnsZones,
        selector: Arc<dyn NodeSelector>,
        liveness: Duration,
    ) -> Self {
        Self {
            store,
            agent,
            dns,
            selector,
            liveness,
        }
    }

    /// Places, persists and provisions a new workload for `account_id`.
    #[instrument(skip(self, request), fields(account_id = %account_id, name = %request.name))]
    pub async fn create(&self, account_id: &AccountId, request: CreateWorkload) -> CoreResult<Workload> {
        validate(&request)?;
        let now = Utc::now();
        let id = WorkloadId::new();

        let mut tx = self.store.begin().await?;
        let account = tx
            .lock_account(account_id)
            .await?
            .ok_or_else(|| CoreError::not_found("account", account_id))?;

        let tier = match_tier(tx.as_mut(), &request.resources).await?;
        check_admission(tx.as_mut(), &account, &tier).await?;

        let candidates =
            find_candidates(tx.as_mut(), &request.resources, now - self.liveness).await?;
        let node = self
            .selector
            .select(&candidates)
            .cloned()
            .ok_or(CoreError::NoCapacityAvailable)?;

        let domain = request
            .domain
            .unwrap_or_else(|| self.dns.workload_domain(&id));
        let workload = Workload {
            id,
            account_id: account.id,
            node_id: node.id,
            name: request.name,
            resources: request.resources,
            credit_rate: tier.cost,
            status: WorkloadStatus::Scheduled,
            domain,
            spec: request.spec,
            created_at: now,
            updated_at: now,
        };
        tx.insert_workload(&workload).await?;
        tx.insert_event(&WorkloadEvent::new(id, WorkloadEventKind::Created, now))
            .await?;
        tx.commit().await?;

        info!(
            workload_id = %id,
            node_id = %node.id,
            tier = %tier.name,
            credit_rate = tier.cost,
            "Workload placed"
        );

        self.provision(&node, &workload).await?;
        Ok(workload)
    }

    /// Hands a committed workload to its node and binds its domain.
    async fn provision(&self, node: &Node, workload: &Workload) -> CoreResult<()> {
        if let Err(e) = self.agent.create_workload(node, workload).await {
            if e.is_timeout() {
                // The agent may still have started it; the row stays so a
                // delete can reach the node.
                warn!(
                    workload_id = %workload.id,
                    node_id = %node.id,
                    error = %e,
                    "Agent timed out, keeping workload row for delete"
                );
                return Err(CoreError::UpstreamAgent(e));
            }
            warn!(workload_id = %workload.id, error = %e, "Agent refused workload, rolling back");
            self.discard(&workload.id).await;
            return Err(e.into());
        }

        if let Some(name) = self.dns.workload_record_name(&workload.domain) {
            let target = self.dns.node_domain(&node.id);
            if let Err(e) = self
                .dns
                .workloads
                .create_record(name, &target, RecordType::Cname)
                .await
            {
                warn!(workload_id = %workload.id, error = %e, "DNS binding failed, rolling back");
                if let Err(e) = self.agent.delete_workload(node, &workload.id).await {
                    error!(workload_id = %workload.id, error = %e, "Failed to delete workload from agent");
                }
                self.discard(&workload.id).await;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Best-effort removal of a workload row during compensation.
    async fn discard(&self, id: &WorkloadId) {
        let result = async {
            let mut tx = self.store.begin().await?;
            tx.delete_workload(id).await?;
            tx.commit().await
        }
        .await;
        if let Err(e) = result {
            error!(workload_id = %id, error = %e, "Failed to remove workload row");
        }
    }

    pub async fn get(&self, account_id: &AccountId, id: &WorkloadId) -> CoreResult<Workload> {
        let mut tx = self.store.begin().await?;
        owned_workload(tx.as_mut(), account_id, id).await
    }

    pub async fn list(&self, account_id: &AccountId) -> CoreResult<Vec<Workload>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_account_workloads(account_id).await?)
    }

    /// Deletes a workload from its node, the store and DNS.
    ///
    /// The agent is asked first, so a failed remote delete leaves the row in
    /// place for a retry.
    #[instrument(skip(self), fields(account_id = %account_id, workload_id = %id))]
    pub async fn delete(&self, account_id: &AccountId, id: &WorkloadId) -> CoreResult<()> {
        let (workload, node) = self.owned_with_node(account_id, id).await?;

        self.agent.delete_workload(&node, id).await?;

        let mut tx = self.store.begin().await?;
        if !tx.delete_workload(id).await? {
            return Err(CoreError::not_found("workload", id));
        }
        tx.commit().await?;

        if let Some(name) = self.dns.workload_record_name(&workload.domain) {
            if let Err(e) = self.dns.workloads.delete_record(name, RecordType::Cname).await {
                warn!(error = %e, "Failed to delete workload DNS record");
            }
        }

        info!("Workload deleted");
        Ok(())
    }

    /// Loads an owned workload and the node it runs on.
    async fn owned_with_node(
        &self,
        account_id: &AccountId,
        id: &WorkloadId,
    ) -> CoreResult<(Workload, Node)> {
        let mut tx = self.store.begin().await?;
        let workload = owned_workload(tx.as_mut(), account_id, id).await?;
        let node = tx
            .get_node(&workload.node_id)
            .await?
            .ok_or_else(|| CoreError::not_found("node", workload.node_id))?;
        Ok((workload, node))
    }
}

/// A workload visible to `account_id`. Other accounts' workloads are
/// reported as missing.
async fn owned_workload(
    tx: &mut dyn StoreTx,
    account_id: &AccountId,
    id: &WorkloadId,
) -> CoreResult<Workload> {
    tx.get_workload(id)
        .await?
        .filter(|w| w.account_id == *account_id)
        .ok_or_else(|| CoreError::not_found("workload", id))
}

fn validate(request: &CreateWorkload) -> CoreResult<()> {
    if request.name.trim().is_empty() {
        return Err(CoreError::Validation("name must not be empty".into()));
    }
    if request.spec.docker_compose.trim().is_empty() {
        return Err(CoreError::Validation("dockerCompose must not be empty".into()));
    }
    if request.spec.public_container_name.trim().is_empty() {
        return Err(CoreError::Validation(
            "publicContainerName must not be empty".into(),
        ));
    }
    if request.spec.public_container_port == 0 {
        return Err(CoreError::Validation(
            "publicContainerPort must not be zero".into(),
        ));
    }
    if let Some(domain) = &request.domain {
        if !is_valid_domain(domain) {
            return Err(CoreError::Validation(format!("invalid domain: {domain}")));
        }
    }
    Ok(())
}

fn is_valid_domain(domain: &str) -> bool {
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && domain.len() <= 253
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::LoggingDns;
    use rstest::rstest;

    #[rstest]
    #[case("app.example.com", true)]
    #[case("my-app.example.io", true)]
    #[case("localhost", false)]
    #[case("-bad.example.com", false)]
    #[case("bad..example.com", false)]
    #[case("spaces are.bad", false)]
    fn test_domain_validation(#[case] domain: &str, #[case] expected: bool) {
        assert_eq!(is_valid_domain(domain), expected);
    }

    #[test]
    fn test_generated_domain_is_valid() {
        let zones = DnsZones::new(
            Arc::new(LoggingDns::new("workloads.example.com")),
            Arc::new(LoggingDns::new("nodes.example.com")),
        );
        let generated = zones.workload_domain(&WorkloadId::new());
        assert!(is_valid_domain(&generated), "{generated}");
        assert!(!generated.contains('_'));
        assert_eq!(generated, generated.to_lowercase());
    }
}
