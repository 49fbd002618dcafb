//! Tenant operations forwarded to the workload's node agent.
//!
//! None of these touch the stored status; the agent reports the outcome as
//! an event.

use fleet_id::{AccountId, WorkloadId};
use tracing::info;

use super::WorkloadService;
use crate::clients::agent::{
    Container, ContainerLogsQuery, SystemLogsQuery, SystemStats, MAX_LOG_LINES,
};
use crate::error::{CoreError, CoreResult};

fn check_max_lines(max_lines: usize) -> CoreResult<()> {
    if max_lines == 0 || max_lines > MAX_LOG_LINES {
        return Err(CoreError::Validation(format!(
            "maxLines must be between 1 and {MAX_LOG_LINES}"
        )));
    }
    Ok(())
}

impl WorkloadService {
    pub async fn start(&self, account_id: &AccountId, id: &WorkloadId) -> CoreResult<()> {
        let (_, node) = self.owned_with_node(account_id, id).await?;
        self.agent.start_workload(&node, id).await?;
        info!(workload_id = %id, "Workload start requested");
        Ok(())
    }

    pub async fn stop(&self, account_id: &AccountId, id: &WorkloadId) -> CoreResult<()> {
        let (_, node) = self.owned_with_node(account_id, id).await?;
        self.agent.stop_workload(&node, id).await?;
        info!(workload_id = %id, "Workload stop requested");
        Ok(())
    }

    pub async fn restart(&self, account_id: &AccountId, id: &WorkloadId) -> CoreResult<()> {
        let (_, node) = self.owned_with_node(account_id, id).await?;
        self.agent.restart_workload(&node, id).await?;
        info!(workload_id = %id, "Workload restart requested");
        Ok(())
    }

    pub async fn containers(
        &self,
        account_id: &AccountId,
        id: &WorkloadId,
    ) -> CoreResult<Vec<Container>> {
        let (_, node) = self.owned_with_node(account_id, id).await?;
        Ok(self.agent.list_containers(&node, id).await?)
    }

    pub async fn container_logs(
        &self,
        account_id: &AccountId,
        id: &WorkloadId,
        query: &ContainerLogsQuery,
    ) -> CoreResult<Vec<String>> {
        check_max_lines(query.max_lines)?;
        let (_, node) = self.owned_with_node(account_id, id).await?;
        Ok(self.agent.container_logs(&node, id, query).await?)
    }

    pub async fn system_logs(
        &self,
        account_id: &AccountId,
        id: &WorkloadId,
        query: &SystemLogsQuery,
    ) -> CoreResult<Vec<String>> {
        check_max_lines(query.max_lines)?;
        let (_, node) = self.owned_with_node(account_id, id).await?;
        Ok(self.agent.system_logs(&node, id, query).await?)
    }

    pub async fn system_stats(
        &self,
        account_id: &AccountId,
        id: &WorkloadId,
    ) -> CoreResult<SystemStats> {
        let (_, node) = self.owned_with_node(account_id, id).await?;
        Ok(self.agent.system_stats(&node, id).await?)
    }
}
