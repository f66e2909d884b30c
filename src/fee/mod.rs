//! FeeSchedule
//!
//! Tiered fee lookup with a lazily populated, append-only cache. Entries are
//! never invalidated for the life of the process, so a tier edited in the
//! store after it was cached keeps its old values here until restart.
//! Expired tiers drop out naturally because every read filters on `now`.
//!
//! Two requests that miss at the same time may both append the same tier;
//! lookups take the first match, so duplicates are harmless.

pub mod error;
pub mod models;

pub use error::FeeError;
pub use models::FeeTier;

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core_types::Clock;
use crate::money::Amount;
use crate::store::Store;

#[derive(Default)]
struct FeeCache {
    tiers: Vec<FeeTier>,
    /// Set once `list_active` has pulled every active tier
    fully_loaded: bool,
}

pub struct FeeSchedule {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    cache: RwLock<FeeCache>,
}

impl FeeSchedule {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            cache: RwLock::new(FeeCache::default()),
        }
    }

    /// Tier covering `amount` right now; cache first, then the store
    pub async fn lookup(&self, amount: Amount) -> Result<FeeTier, FeeError> {
        let now = self.clock.now();

        {
            let cache = self.cache.read().await;
            if let Some(tier) = cache.tiers.iter().find(|t| t.matches(amount, now)) {
                return Ok(tier.clone());
            }
        }

        debug!(amount = %amount, "Fee cache miss");
        let tier = self
            .store
            .fee_tier_for(amount, now)
            .await?
            .ok_or(FeeError::NotFound(amount))?;

        self.cache.write().await.tiers.push(tier.clone());
        Ok(tier)
    }

    /// Every tier whose effective window contains now
    pub async fn list_active(&self) -> Result<Vec<FeeTier>, FeeError> {
        let now = self.clock.now();

        {
            let cache = self.cache.read().await;
            if cache.fully_loaded {
                return Ok(active_at(&cache.tiers, now));
            }
        }

        debug!("Fee cache not loaded, reading active tiers from store");
        let loaded = self.store.active_fee_tiers(now).await?;

        let mut cache = self.cache.write().await;
        for tier in loaded {
            if !cache.tiers.contains(&tier) {
                cache.tiers.push(tier);
            }
        }
        cache.fully_loaded = true;
        Ok(active_at(&cache.tiers, now))
    }

    /// Persist a new tier and make it visible to this process immediately
    pub async fn add_tier(&self, tier: FeeTier) -> Result<(), FeeError> {
        if tier.min_amount >= tier.max_amount {
            return Err(FeeError::InvalidTier("min_amount must be below max_amount"));
        }
        if tier.effective_from >= tier.effective_to {
            return Err(FeeError::InvalidTier(
                "effective_from must be before effective_to",
            ));
        }

        self.store.insert_fee_tier(&tier).await?;
        info!(
            min = %tier.min_amount,
            max = %tier.max_amount,
            fee = %tier.fee,
            from = %tier.effective_from,
            to = %tier.effective_to,
            "Fee tier added"
        );
        self.cache.write().await.tiers.push(tier);
        Ok(())
    }
}

fn active_at(tiers: &[FeeTier], now: chrono::DateTime<chrono::Utc>) -> Vec<FeeTier> {
    let mut out: Vec<FeeTier> = Vec::new();
    for tier in tiers.iter().filter(|t| t.is_effective_at(now)) {
        if !out.contains(tier) {
            out.push(tier.clone());
        }
    }
    out
}
