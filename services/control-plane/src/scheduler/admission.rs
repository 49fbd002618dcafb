//! Credit-based admission control.

use crate::db::StoreTx;
use crate::error::{CoreError, CoreResult};
use crate::models::{Account, Tier};

/// A new workload is admitted only if the account can keep all of its
/// workloads running for at least this long.
pub const MIN_RUNTIME_MINUTES: i64 = 5;

/// Credits an account needs to add a workload costing `cost` per minute on
/// top of its current `spend_rate`.
pub fn required_credits(spend_rate: i64, cost: i64) -> i64 {
    spend_rate
        .saturating_add(cost)
        .saturating_mul(MIN_RUNTIME_MINUTES)
}

/// Whether `credits` cover [`required_credits`]. Equality admits.
pub fn admits(spend_rate: i64, cost: i64, credits: i64) -> bool {
    required_credits(spend_rate, cost) <= credits
}

/// Rejects with `InsufficientCredits` unless `account` can afford `tier`.
///
/// The spend rate is read inside `tx`, which should already hold the
/// account's lock.
pub async fn check_admission(tx: &mut dyn StoreTx, account: &Account, tier: &Tier) -> CoreResult<()> {
    let spend_rate = tx.account_spend_rate(&account.id).await?;
    if admits(spend_rate, tier.cost, account.credits) {
        Ok(())
    } else {
        Err(CoreError::InsufficientCredits {
            required: required_credits(spend_rate, tier.cost),
            available: account.credits,
        })
    }
}
