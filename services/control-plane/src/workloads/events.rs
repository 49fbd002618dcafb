//! The workload event log and the status derived from it.

use chrono::{DateTime, Utc};
use fleet_events::{replay_status, WorkloadEventKind, WorkloadStatus};
use fleet_id::{AccountId, WorkloadId};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::{owned_workload, WorkloadService};
use crate::clients::AgentError;
use crate::error::{CoreError, CoreResult};
use crate::models::{Workload, WorkloadEvent};

/// An event reported by a node agent.
///
/// `{"kind": "failedToStart", "error": "...", "timestamp": "..."}`. The
/// timestamp defaults to the time of receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitEvent {
    #[serde(flatten)]
    pub kind: WorkloadEventKind,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl WorkloadService {
    /// Appends an event and re-derives the workload's status.
    ///
    /// Resubmitting an event with the same kind and timestamp is a no-op.
    #[instrument(skip(self, event), fields(workload_id = %id, kind = event.kind.name()))]
    pub async fn submit_event(&self, id: &WorkloadId, event: SubmitEvent) -> CoreResult<Workload> {
        let timestamp = event.timestamp.unwrap_or_else(Utc::now);

        let mut tx = self.store.begin().await?;
        let mut workload = tx
            .get_workload(id)
            .await?
            .ok_or_else(|| CoreError::not_found("workload", id))?;

        let inserted = tx
            .insert_event(&WorkloadEvent::new(*id, event.kind, timestamp))
            .await?;
        if !inserted {
            debug!("Duplicate event ignored");
            return Ok(workload);
        }

        let log = tx.list_events(id).await?;
        if let Some(status) = replay_status(log.iter().map(|e| &e.kind)) {
            if status != workload.status {
                let now = Utc::now();
                tx.set_workload_status(id, status, now).await?;
                info!(from = %workload.status, to = %status, "Workload status changed");
                workload.status = status;
                workload.updated_at = now;
            }
        }
        tx.commit().await?;

        Ok(workload)
    }

    /// An owned workload's events in timestamp order.
    pub async fn list_events(
        &self,
        account_id: &AccountId,
        id: &WorkloadId,
    ) -> CoreResult<Vec<WorkloadEvent>> {
        let mut tx = self.store.begin().await?;
        owned_workload(tx.as_mut(), account_id, id).await?;
        Ok(tx.list_events(id).await?)
    }

    /// Stops a workload on its node and records it as stopped.
    ///
    /// Used when the owning account runs out of credits. If the agent cannot
    /// be reached nothing is recorded, so the next metering pass retries.
    #[instrument(skip(self, workload), fields(workload_id = %workload.id, account_id = %workload.account_id))]
    pub async fn force_stop(&self, workload: &Workload) -> CoreResult<()> {
        let node = {
            let mut tx = self.store.begin().await?;
            tx.get_node(&workload.node_id)
                .await?
                .ok_or_else(|| CoreError::not_found("node", workload.node_id))?
        };

        match self.agent.stop_workload(&node, &workload.id).await {
            Ok(()) | Err(AgentError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        tx.insert_event(&WorkloadEvent::new(workload.id, WorkloadEventKind::Stopped, now))
            .await?;
        if !tx
            .set_workload_status(&workload.id, WorkloadStatus::Stopped, now)
            .await?
        {
            return Err(CoreError::not_found("workload", workload.id));
        }
        tx.commit().await?;

        info!("Workload force-stopped");
        Ok(())
    }
}
