//! Tenant accounts and their prepaid credit balance.
//!
//! An account's API token is generated here, returned exactly once, and
//! stored only as its SHA-256 digest.

use std::sync::Arc;

use chrono::Utc;
use fleet_id::AccountId;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::db::Store;
use crate::error::{CoreError, CoreResult};
use crate::models::Account;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccount {
    pub name: String,
    #[serde(default)]
    pub credits: i64,
}

/// A freshly created account together with its plaintext token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAccount {
    #[serde(flatten)]
    pub account: Account,
    pub token: String,
}

/// Hex-encoded SHA-256 of a token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, request: CreateAccount) -> CoreResult<CreatedAccount> {
        if request.name.trim().is_empty() {
            return Err(CoreError::Validation("account name must not be empty".into()));
        }
        if request.credits < 0 {
            return Err(CoreError::Validation("credits must not be negative".into()));
        }

        let token = generate_token();
        let account = Account {
            id: AccountId::new(),
            name: request.name,
            token_hash: hash_token(&token),
            credits: request.credits,
            created_at: Utc::now(),
        };

        let mut tx = self.store.begin().await?;
        tx.insert_account(&account).await?;
        tx.commit().await?;

        info!(account_id = %account.id, name = %account.name, credits = account.credits, "Account created");
        Ok(CreatedAccount { account, token })
    }

    pub async fn get(&self, id: &AccountId) -> CoreResult<Account> {
        let mut tx = self.store.begin().await?;
        tx.get_account(id)
            .await?
            .ok_or_else(|| CoreError::not_found("account", id))
    }

    pub async fn list(&self) -> CoreResult<Vec<Account>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_accounts().await?)
    }

    /// The account owning `token`, if any.
    pub async fn authenticate(&self, token: &str) -> CoreResult<Option<Account>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.find_account_by_token_hash(&hash_token(token)).await?)
    }

    /// Tops up an account's balance.
    pub async fn add_credits(&self, id: &AccountId, amount: i64) -> CoreResult<Account> {
        if amount <= 0 {
            return Err(CoreError::Validation("amount must be positive".into()));
        }

        let mut tx = self.store.begin().await?;
        let mut account = tx
            .lock_account(id)
            .await?
            .ok_or_else(|| CoreError::not_found("account", id))?;
        account.credits = account.credits.saturating_add(amount);
        tx.set_account_credits(id, account.credits).await?;
        tx.commit().await?;

        info!(account_id = %id, amount, credits = account.credits, "Credits added");
        Ok(account)
    }
}
