//! SpendingLimitGuard
//!
//! One `(period, cap)` pair per account. [`SpendingLimitGuard::check`] is the
//! pre-authorization check; the authorizer hands the same [`LimitWindow`] to
//! the store, which repeats the aggregate-and-compare inside the commit
//! transaction, so racing transfers cannot jointly overshoot the cap.

pub mod error;
pub mod models;

pub use error::LimitError;
pub use models::{LimitWindow, Period, SpendingLimit};

use std::sync::Arc;

use tracing::{debug, info};

use crate::core_types::{AccountAddress, Clock, OwnerId};
use crate::money::Amount;
use crate::store::Store;

pub struct SpendingLimitGuard {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl SpendingLimitGuard {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// `spent_in_current_window + proposed <= cap`; true when no limit is set
    pub async fn check(&self, address: &AccountAddress, proposed: Amount) -> Result<bool, LimitError> {
        let Some(limit) = self.store.get_limit(address).await? else {
            return Ok(true);
        };

        let now = self.clock.now();
        let spent = self.store.spent_in_period(address, limit.period, now).await?;
        let within = match spent.checked_add(proposed) {
            Ok(projected) => projected <= limit.cap,
            Err(_) => false,
        };

        debug!(
            address = %address,
            period = %limit.period,
            cap = %limit.cap,
            spent = %spent,
            proposed = %proposed,
            within,
            "Spending limit check"
        );
        Ok(within)
    }

    /// Replace any previous limit for `address`. Only an owner may set it.
    pub async fn set_limit(
        &self,
        actor: OwnerId,
        address: &AccountAddress,
        period: Period,
        cap: Amount,
    ) -> Result<(), LimitError> {
        let account = self
            .store
            .get_account(address)
            .await?
            .ok_or_else(|| LimitError::AccountNotFound(address.clone()))?;
        if !account.is_owned_by(actor) {
            return Err(LimitError::NotOwner {
                actor,
                address: address.clone(),
            });
        }

        self.store
            .upsert_limit(&SpendingLimit {
                address: address.clone(),
                period,
                cap,
            })
            .await?;
        info!(address = %address, actor, period = %period, cap = %cap, "Spending limit set");
        Ok(())
    }

    pub async fn get_limit(&self, address: &AccountAddress) -> Result<Option<SpendingLimit>, LimitError> {
        Ok(self.store.get_limit(address).await?)
    }

    /// The window the store must enforce when committing from `address`
    pub async fn limit_window(&self, address: &AccountAddress) -> Result<Option<LimitWindow>, LimitError> {
        Ok(self.store.get_limit(address).await?.map(|l| LimitWindow {
            period: l.period,
            cap: l.cap,
        }))
    }
}
