//! Credit metering and reclamation.
//!
//! Every interval the metering worker debits each account by the per-minute
//! rate of its non-stopped workloads, then force-stops the workloads of
//! accounts that ran dry. The debit pass runs in one transaction and either
//! applies to every account or to none.

mod meter;
mod worker;

pub use meter::{meter, MeterOutcome};
pub use worker::MeteringWorker;

use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::db::Store;
use crate::error::CoreResult;
use crate::workloads::WorkloadService;

/// Result of one metering pass including reclamation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeteringReport {
    pub accounts_debited: usize,
    pub credits_debited: i64,
    pub offenders: usize,
    pub stopped: usize,
}

#[derive(Clone)]
pub struct MeteringService {
    store: Arc<dyn Store>,
    workloads: WorkloadService,
}

impl MeteringService {
    pub fn new(store: Arc<dyn Store>, workloads: WorkloadService) -> Self {
        Self { store, workloads }
    }

    /// Meters every non-stopped workload once and stops the offenders.
    ///
    /// An offender whose stop fails stays active and is picked up again by
    /// the next pass.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> CoreResult<MeteringReport> {
        let outcome = {
            let mut tx = self.store.begin().await?;
            let batch = tx.list_active_workloads().await?;
            let outcome = meter(tx.as_mut(), &batch).await?;
            tx.commit().await?;
            outcome
        };

        let mut stopped = 0;
        for workload in &outcome.offenders {
            match self.workloads.force_stop(workload).await {
                Ok(()) => stopped += 1,
                Err(e) => {
                    error!(workload_id = %workload.id, error = %e, "Failed to stop workload of exhausted account");
                }
            }
        }

        let report = MeteringReport {
            accounts_debited: outcome.accounts_debited,
            credits_debited: outcome.credits_debited,
            offenders: outcome.offenders.len(),
            stopped,
        };
        if report.offenders > 0 {
            info!(
                offenders = report.offenders,
                stopped = report.stopped,
                "Reclaimed workloads of exhausted accounts"
            );
        }
        Ok(report)
    }
}
