//! Metering background worker.
//!
//! Runs a metering pass on a periodic interval.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use super::MeteringService;

/// Worker that runs metering until shutdown.
pub struct MeteringWorker {
    service: MeteringService,
    interval: Duration,
}

impl MeteringWorker {
    pub fn new(service: MeteringService, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run the metering worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting metering worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately; the first debit is one full interval out.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.service.run_once().await {
                        Ok(report) => debug!(
                            accounts_debited = report.accounts_debited,
                            credits_debited = report.credits_debited,
                            "Metering pass complete"
                        ),
                        Err(e) => error!(error = %e, "Metering pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Metering worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
