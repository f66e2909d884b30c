//! Durable store seam
//!
//! The store is the only source of truth for balances and pool status. Every
//! mutation here is a single atomic store transaction; every check that must
//! hold at commit time (freeze flag, balance, spending limit, pool capacity,
//! refund marker) is re-evaluated inside that transaction under row locks.
//!
//! Implementations:
//! - [`PgStore`] - PostgreSQL via sqlx
//! - [`MemoryStore`] - in-process, fully serialized (tests, demos)

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::account::{Account, OwnerChange};
use crate::cashpool::{CashPool, PoolTerms};
use crate::core_types::{AccountAddress, OwnerId};
use crate::fee::FeeTier;
use crate::limit::{LimitWindow, Period, SpendingLimit};
use crate::money::Amount;
use crate::transfer::{FundRequest, Transaction};

/// Commit-time rejections raised inside the store transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("account not found: {0}")]
    AccountNotFound(AccountAddress),

    #[error("account is frozen: {0}")]
    AccountFrozen(AccountAddress),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("spending limit exceeded")]
    LimitExceeded,

    #[error("cash pool is not accepting deposits")]
    PoolClosed,

    #[error("deposit would exceed the cash pool target")]
    PoolTargetExceeded,

    #[error("cash pool funds are locked")]
    PoolLocked,

    #[error("transaction already reversed")]
    AlreadyReversed,
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Rejection::AccountFrozen(_) => "ACCOUNT_FROZEN",
            Rejection::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Rejection::LimitExceeded => "LIMIT_EXCEEDED",
            Rejection::PoolClosed => "POOL_CLOSED",
            Rejection::PoolTargetExceeded => "POOL_TARGET_EXCEEDED",
            Rejection::PoolLocked => "POOL_LOCKED",
            Rejection::AlreadyReversed => "ALREADY_REVERSED",
        }
    }
}

/// Store error taxonomy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Rejected by ledger: {0}")]
    Rejected(Rejection),

    /// Transient connectivity failure; the caller may retry
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<Rejection> for StoreError {
    fn from(r: Rejection) -> Self {
        StoreError::Rejected(r)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
            sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.constraint().unwrap_or("unique").to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::NotFound(db.constraint().unwrap_or("foreign key").to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

/// A fully-formed transaction plus the limit to enforce at commit
#[derive(Debug, Clone)]
pub struct TransferCommit {
    pub transaction: Transaction,
    pub limit: Option<LimitWindow>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert the account and its owner rows atomically.
    /// Address collisions surface as [`StoreError::Duplicate`].
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;

    async fn get_account(&self, address: &AccountAddress) -> Result<Option<Account>, StoreError>;

    async fn system_account(&self) -> Result<Option<Account>, StoreError>;

    async fn add_owner(
        &self,
        address: &AccountAddress,
        owner: OwnerId,
    ) -> Result<OwnerChange, StoreError>;

    async fn remove_owner(
        &self,
        address: &AccountAddress,
        owner: OwnerId,
    ) -> Result<OwnerChange, StoreError>;

    async fn is_owner(&self, address: &AccountAddress, owner: OwnerId)
    -> Result<bool, StoreError>;

    /// Returns false if the account does not exist
    async fn set_active(&self, address: &AccountAddress, active: bool)
    -> Result<bool, StoreError>;

    /// Derived balance: `initial_deposit + Σ incoming − Σ outgoing`
    async fn balance(&self, address: &AccountAddress) -> Result<Amount, StoreError>;

    async fn register_key(&self, owner: OwnerId, public_key: &[u8]) -> Result<(), StoreError>;

    async fn public_key(&self, owner: OwnerId) -> Result<Option<Vec<u8>>, StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Validate and insert in one store transaction.
    async fn commit_transfer(&self, commit: &TransferCommit) -> Result<Transaction, StoreError>;

    async fn transactions_for(
        &self,
        address: &AccountAddress,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn insert_fund_request(&self, request: &FundRequest) -> Result<(), StoreError>;

    async fn fund_requests_for(
        &self,
        address: &AccountAddress,
    ) -> Result<Vec<FundRequest>, StoreError>;
}

#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn insert_pool(&self, account: &Account, terms: &PoolTerms) -> Result<(), StoreError>;

    async fn get_pool(&self, address: &AccountAddress) -> Result<Option<CashPool>, StoreError>;

    /// Conditional `OPEN → FUNDED` where collected ≥ target.
    /// Returns true only for the call that performed the flip.
    async fn mark_pool_funded(
        &self,
        address: &AccountAddress,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Open pools past expiry with collected < target
    async fn expired_open_pools(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AccountAddress>, StoreError>;

    /// Incoming transactions without a compensating reversal
    async fn unreversed_contributions(
        &self,
        address: &AccountAddress,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Conditional `OPEN → REFUNDED` once expired and fully reversed
    async fn mark_pool_refunded(
        &self,
        address: &AccountAddress,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait LimitStore: Send + Sync {
    async fn get_limit(&self, address: &AccountAddress)
    -> Result<Option<SpendingLimit>, StoreError>;

    async fn upsert_limit(&self, limit: &SpendingLimit) -> Result<(), StoreError>;

    /// Σ outgoing committed inside the period window containing `now`
    async fn spent_in_period(
        &self,
        address: &AccountAddress,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<Amount, StoreError>;
}

#[async_trait]
pub trait FeeStore: Send + Sync {
    async fn fee_tier_for(
        &self,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Option<FeeTier>, StoreError>;

    async fn active_fee_tiers(&self, now: DateTime<Utc>) -> Result<Vec<FeeTier>, StoreError>;

    async fn insert_fee_tier(&self, tier: &FeeTier) -> Result<(), StoreError>;
}

/// Everything the core needs from the durable store
pub trait Store: AccountStore + LedgerStore + PoolStore + LimitStore + FeeStore {}

impl<T> Store for T where T: AccountStore + LedgerStore + PoolStore + LimitStore + FeeStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_codes() {
        assert_eq!(Rejection::InsufficientFunds.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(Rejection::AlreadyReversed.code(), "ALREADY_REVERSED");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_retryable());
        assert!(!StoreError::Rejected(Rejection::LimitExceeded).is_retryable());
    }
}
