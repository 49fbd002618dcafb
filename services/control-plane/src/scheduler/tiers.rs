//! The tier catalog: the only resource shapes a workload may request.

use std::sync::Arc;

use chrono::Utc;
use fleet_id::TierId;
use serde::Deserialize;
use tracing::info;

use crate::db::{Store, StoreTx};
use crate::error::{CoreError, CoreResult};
use crate::models::{Resources, Tier};

/// Operator request to add a tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTier {
    pub name: String,
    #[serde(flatten)]
    pub resources: Resources,
    pub cost: i64,
}

impl CreateTier {
    fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("tier name must not be empty".into()));
        }
        if self.cost < 0 {
            return Err(CoreError::Validation("tier cost must not be negative".into()));
        }
        Ok(())
    }
}

/// The tier whose shape is exactly `resources`.
pub async fn match_tier(tx: &mut dyn StoreTx, resources: &Resources) -> CoreResult<Tier> {
    tx.find_tier_by_resources(resources)
        .await?
        .ok_or(CoreError::InvalidTier)
}

#[derive(Clone)]
pub struct TierCatalog {
    store: Arc<dyn Store>,
}

impl TierCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Adds a tier. Both the name and the shape must be unused.
    pub async fn create(&self, request: CreateTier) -> CoreResult<Tier> {
        request.validate()?;
        let tier = Tier {
            id: TierId::new(),
            name: request.name,
            resources: request.resources,
            cost: request.cost,
            created_at: Utc::now(),
        };

        let mut tx = self.store.begin().await?;
        tx.insert_tier(&tier).await?;
        tx.commit().await?;

        info!(tier_id = %tier.id, name = %tier.name, cost = tier.cost, "Tier created");
        Ok(tier)
    }

    pub async fn list(&self) -> CoreResult<Vec<Tier>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_tiers().await?)
    }

    /// Removes a tier. Workloads already placed on it keep their rate.
    pub async fn delete(&self, id: &TierId) -> CoreResult<()> {
        let mut tx = self.store.begin().await?;
        if !tx.delete_tier(id).await? {
            return Err(CoreError::not_found("tier", id));
        }
        tx.commit().await?;
        info!(tier_id = %id, "Tier deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn request(name: &str, cpus: u32, cost: i64) -> CreateTier {
        CreateTier {
            name: name.into(),
            resources: Resources::new(cpus, 2048, 20, 0),
            cost,
        }
    }

    #[tokio::test]
    async fn test_match_is_exact() {
        let store = Arc::new(MemoryStore::new());
        let catalog = TierCatalog::new(store.clone());
        let small = catalog.create(request("small", 1, 1)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let matched = match_tier(tx.as_mut(), &small.resources).await.unwrap();
        assert_eq!(matched.id, small.id);

        let bigger = Resources::new(2, 2048, 20, 0);
        assert!(matches!(
            match_tier(tx.as_mut(), &bigger).await,
            Err(CoreError::InvalidTier)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_shape_conflicts() {
        let catalog = TierCatalog::new(Arc::new(MemoryStore::new()));
        catalog.create(request("small", 1, 1)).await.unwrap();
        let err = catalog.create(request("tiny", 1, 3)).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_negative_cost_rejected() {
        let catalog = TierCatalog::new(Arc::new(MemoryStore::new()));
        let err = catalog.create(request("free", 1, -1)).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let catalog = TierCatalog::new(Arc::new(MemoryStore::new()));
        let err = catalog.delete(&TierId::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { resource: "tier", .. }));
    }
}
