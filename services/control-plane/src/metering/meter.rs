//! One metering pass over a batch of workloads.

use std::collections::BTreeMap;

use fleet_id::AccountId;
use tracing::{debug, warn};

use crate::db::StoreTx;
use crate::error::CoreResult;
use crate::models::Workload;

/// What a metering pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeterOutcome {
    /// Accounts that were debited.
    pub accounts_debited: usize,
    /// Total credits removed across all accounts.
    pub credits_debited: i64,
    /// Non-stopped workloads of accounts whose balance reached zero.
    pub offenders: Vec<Workload>,
}

/// Debits each account in `batch` by the summed rate of its workloads.
///
/// Balances floor at zero. Every non-stopped workload of an account left at
/// exactly zero is returned as an offender, including workloads that were
/// not part of the batch. Accounts absent from the batch are untouched.
pub async fn meter(tx: &mut dyn StoreTx, batch: &[Workload]) -> CoreResult<MeterOutcome> {
    let mut rates: BTreeMap<AccountId, i64> = BTreeMap::new();
    for workload in batch {
        let rate = rates.entry(workload.account_id).or_default();
        *rate = rate.saturating_add(workload.credit_rate);
    }

    let mut outcome = MeterOutcome::default();
    for (account_id, rate) in rates {
        let Some(account) = tx.lock_account(&account_id).await? else {
            warn!(account_id = %account_id, "Metered workload has no account");
            continue;
        };

        let remaining = account.credits.saturating_sub(rate).max(0);
        tx.set_account_credits(&account_id, remaining).await?;
        outcome.accounts_debited += 1;
        outcome.credits_debited += account.credits - remaining;
        debug!(account_id = %account_id, rate, remaining, "Account debited");

        if remaining == 0 {
            let active = tx
                .list_account_workloads(&account_id)
                .await?
                .into_iter()
                .filter(|w| w.status.is_active());
            outcome.offenders.extend(active);
        }
    }

    Ok(outcome)
}
