//! Fee tier model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Amount;

/// Half-open amount range `[min_amount, max_amount)` mapped to a flat fee,
/// valid inside the half-open window `[effective_from, effective_to)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    pub min_amount: Amount,
    pub max_amount: Amount,
    pub fee: Amount,
    pub effective_from: DateTime<Utc>,
    pub effective_to: DateTime<Utc>,
}

impl FeeTier {
    #[inline]
    pub fn covers(&self, amount: Amount) -> bool {
        self.min_amount <= amount && amount < self.max_amount
    }

    #[inline]
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.effective_from <= now && now < self.effective_to
    }

    pub fn matches(&self, amount: Amount, now: DateTime<Utc>) -> bool {
        self.covers(amount) && self.is_effective_at(now)
    }
}
