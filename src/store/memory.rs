//! In-memory store
//!
//! All state sits behind one async mutex, so every operation is serialized.
//! That is stronger than the PostgreSQL implementation's row locking and
//! makes the commit-time checks trivially atomic. Used by the test suite and
//! for local demos; nothing survives a restart.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    AccountStore, FeeStore, LedgerStore, LimitStore, PoolStore, Rejection, StoreError,
    TransferCommit,
};
use crate::account::{Account, AccountKind, OwnerChange};
use crate::cashpool::{CashPool, PoolStatus, PoolTerms};
use crate::core_types::{AccountAddress, OwnerId, TransactionId};
use crate::fee::FeeTier;
use crate::limit::{Period, SpendingLimit};
use crate::money::Amount;
use crate::transfer::{FundRequest, Transaction};

struct PoolRow {
    terms: PoolTerms,
    status: PoolStatus,
    funded_by: Option<TransactionId>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<AccountAddress, Account>,
    keys: HashMap<OwnerId, Vec<u8>>,
    pools: HashMap<AccountAddress, PoolRow>,
    transactions: Vec<Transaction>,
    reversed: HashSet<TransactionId>,
    fund_requests: Vec<FundRequest>,
    limits: HashMap<AccountAddress, SpendingLimit>,
    fee_tiers: Vec<FeeTier>,
}

impl State {
    fn incoming(&self, address: &AccountAddress) -> Amount {
        self.transactions
            .iter()
            .filter(|t| &t.receiver == address)
            .map(|t| t.amount)
            .sum()
    }

    fn outgoing(&self, address: &AccountAddress) -> Amount {
        self.transactions
            .iter()
            .filter(|t| &t.sender == address)
            .map(|t| t.amount)
            .sum()
    }

    fn balance(&self, address: &AccountAddress) -> Result<Amount, StoreError> {
        let account = self
            .accounts
            .get(address)
            .ok_or_else(|| StoreError::NotFound(address.to_string()))?;
        let credited = account
            .initial_deposit
            .checked_add(self.incoming(address))
            .map_err(|e| StoreError::Database(e.to_string()))?;
        credited
            .checked_sub(self.outgoing(address))
            .ok_or_else(|| StoreError::Database(format!("negative balance for {}", address)))
    }

    fn spent_since(&self, address: &AccountAddress, since: DateTime<Utc>) -> Amount {
        self.transactions
            .iter()
            .filter(|t| &t.sender == address && t.committed_at >= since)
            .map(|t| t.amount)
            .sum()
    }

    fn is_unreversed_contribution(&self, pool: &AccountAddress, t: &Transaction) -> bool {
        &t.receiver == pool && t.reverses.is_none() && !self.reversed.contains(&t.id)
    }

    fn pool_view(&self, address: &AccountAddress) -> Option<CashPool> {
        let account = self.accounts.get(address)?;
        let row = self.pools.get(address)?;
        Some(CashPool {
            account: account.clone(),
            terms: row.terms.clone(),
            status: row.status,
            collected: self.incoming(address),
            funded_by: row.funded_by,
        })
    }

    fn check_commit(&self, commit: &TransferCommit) -> Result<(), StoreError> {
        let tx = &commit.transaction;

        for address in [&tx.sender, &tx.receiver] {
            let account = self
                .accounts
                .get(address)
                .ok_or_else(|| Rejection::AccountNotFound(address.clone()))?;
            if !account.active {
                return Err(Rejection::AccountFrozen(address.clone()).into());
            }
        }

        if self.transactions.iter().any(|t| t.id == tx.id) {
            return Err(StoreError::Duplicate("transactions_pkey".into()));
        }
        if let Some(original) = tx.reverses
            && self.reversed.contains(&original)
        {
            return Err(Rejection::AlreadyReversed.into());
        }

        if self.balance(&tx.sender)? < tx.amount {
            return Err(Rejection::InsufficientFunds.into());
        }

        if let Some(limit) = commit.limit {
            let since = limit.period.window_start(tx.committed_at);
            let projected = self
                .spent_since(&tx.sender, since)
                .checked_add(tx.amount)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            if projected > limit.cap {
                return Err(Rejection::LimitExceeded.into());
            }
        }

        if let Some(pool) = self.pools.get(&tx.sender) {
            let allowed = match tx.reverses {
                Some(_) => pool.status == PoolStatus::Open,
                None => pool.status == PoolStatus::Funded && tx.receiver == pool.terms.receiver,
            };
            if !allowed {
                return Err(Rejection::PoolLocked.into());
            }
        }

        if tx.reverses.is_none()
            && let Some(pool) = self.pools.get(&tx.receiver)
        {
            if pool.status != PoolStatus::Open || tx.committed_at > pool.terms.expires_at {
                return Err(Rejection::PoolClosed.into());
            }
            let projected = self
                .incoming(&tx.receiver)
                .checked_add(tx.amount)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            if projected > pool.terms.target_amount {
                return Err(Rejection::PoolTargetExceeded.into());
            }
        }

        Ok(())
    }
}

/// Serialized in-process store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a connectivity outage: every call fails with `Unavailable`
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::Release);
    }

    fn ensure_up(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Acquire) {
            Err(StoreError::Unavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }

    /// Σ derived balances over every account
    pub async fn total_balance(&self) -> Amount {
        let state = self.state.lock().await;
        state
            .accounts
            .keys()
            .filter_map(|a| state.balance(a).ok())
            .sum()
    }

    /// Σ initial deposits over every account
    pub async fn total_initial_deposits(&self) -> Amount {
        let state = self.state.lock().await;
        state.accounts.values().map(|a| a.initial_deposit).sum()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        self.ensure_up()?;
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(&account.address) {
            return Err(StoreError::Duplicate("accounts_pkey".into()));
        }
        if account.kind == AccountKind::System
            && state.accounts.values().any(|a| a.kind == AccountKind::System)
        {
            return Err(StoreError::Duplicate("accounts_single_system".into()));
        }
        state
            .accounts
            .insert(account.address.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, address: &AccountAddress) -> Result<Option<Account>, StoreError> {
        self.ensure_up()?;
        Ok(self.state.lock().await.accounts.get(address).cloned())
    }

    async fn system_account(&self) -> Result<Option<Account>, StoreError> {
        self.ensure_up()?;
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.kind == AccountKind::System)
            .cloned())
    }

    async fn add_owner(
        &self,
        address: &AccountAddress,
        owner: OwnerId,
    ) -> Result<OwnerChange, StoreError> {
        self.ensure_up()?;
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .get_mut(address)
            .ok_or_else(|| StoreError::NotFound(address.to_string()))?;
        if account.owners.contains(&owner) {
            return Ok(OwnerChange::Unchanged);
        }
        if account.owners.len() >= account.total_owners as usize {
            return Ok(OwnerChange::SeatsFull);
        }
        account.owners.push(owner);
        Ok(OwnerChange::Applied)
    }

    async fn remove_owner(
        &self,
        address: &AccountAddress,
        owner: OwnerId,
    ) -> Result<OwnerChange, StoreError> {
        self.ensure_up()?;
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .get_mut(address)
            .ok_or_else(|| StoreError::NotFound(address.to_string()))?;
        if !account.owners.contains(&owner) {
            return Ok(OwnerChange::Unchanged);
        }
        if account.owners.len() == 1 {
            return Ok(OwnerChange::LastOwner);
        }
        account.owners.retain(|o| *o != owner);
        Ok(OwnerChange::Applied)
    }

    async fn is_owner(
        &self,
        address: &AccountAddress,
        owner: OwnerId,
    ) -> Result<bool, StoreError> {
        self.ensure_up()?;
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .get(address)
            .is_some_and(|a| a.owners.contains(&owner)))
    }

    async fn set_active(
        &self,
        address: &AccountAddress,
        active: bool,
    ) -> Result<bool, StoreError> {
        self.ensure_up()?;
        let mut state = self.state.lock().await;
        match state.accounts.get_mut(address) {
            Some(account) => {
                account.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn balance(&self, address: &AccountAddress) -> Result<Amount, StoreError> {
        self.ensure_up()?;
        self.state.lock().await.balance(address)
    }

    async fn register_key(&self, owner: OwnerId, public_key: &[u8]) -> Result<(), StoreError> {
        self.ensure_up()?;
        self.state
            .lock()
            .await
            .keys
            .insert(owner, public_key.to_vec());
        Ok(())
    }

    async fn public_key(&self, owner: OwnerId) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_up()?;
        Ok(self.state.lock().await.keys.get(&owner).cloned())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn commit_transfer(&self, commit: &TransferCommit) -> Result<Transaction, StoreError> {
        self.ensure_up()?;
        let mut state = self.state.lock().await;
        state.check_commit(commit)?;

        let tx = commit.transaction.clone();
        if let Some(original) = tx.reverses {
            state.reversed.insert(original);
        }
        state.transactions.push(tx.clone());

        // Funded flip in the same critical section as the deposit
        if tx.reverses.is_none() {
            let collected = state.incoming(&tx.receiver);
            if let Some(row) = state.pools.get_mut(&tx.receiver)
                && row.status == PoolStatus::Open
                && collected >= row.terms.target_amount
            {
                row.status = PoolStatus::Funded;
                row.funded_by = Some(tx.id);
            }
        }
        Ok(tx)
    }

    async fn transactions_for(
        &self,
        address: &AccountAddress,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.ensure_up()?;
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| &t.sender == address || &t.receiver == address)
            .cloned()
            .collect())
    }

    async fn insert_fund_request(&self, request: &FundRequest) -> Result<(), StoreError> {
        self.ensure_up()?;
        let mut state = self.state.lock().await;
        if state.fund_requests.iter().any(|r| r.id == request.id) {
            return Err(StoreError::Duplicate("fund_requests_pkey".into()));
        }
        state.fund_requests.push(request.clone());
        Ok(())
    }

    async fn fund_requests_for(
        &self,
        address: &AccountAddress,
    ) -> Result<Vec<FundRequest>, StoreError> {
        self.ensure_up()?;
        let state = self.state.lock().await;
        Ok(state
            .fund_requests
            .iter()
            .filter(|r| &r.requester == address || &r.payer == address)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PoolStore for MemoryStore {
    async fn insert_pool(&self, account: &Account, terms: &PoolTerms) -> Result<(), StoreError> {
        self.ensure_up()?;
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(&account.address) {
            return Err(StoreError::Duplicate("accounts_pkey".into()));
        }
        if !state.accounts.contains_key(&terms.receiver) {
            return Err(StoreError::NotFound(terms.receiver.to_string()));
        }
        state
            .accounts
            .insert(account.address.clone(), account.clone());
        state.pools.insert(
            account.address.clone(),
            PoolRow {
                terms: terms.clone(),
                status: PoolStatus::Open,
                funded_by: None,
            },
        );
        Ok(())
    }

    async fn get_pool(&self, address: &AccountAddress) -> Result<Option<CashPool>, StoreError> {
        self.ensure_up()?;
        Ok(self.state.lock().await.pool_view(address))
    }

    async fn mark_pool_funded(
        &self,
        address: &AccountAddress,
        _now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.ensure_up()?;
        let mut state = self.state.lock().await;
        let collected = state.incoming(address);
        match state.pools.get_mut(address) {
            Some(row) if row.status == PoolStatus::Open && collected >= row.terms.target_amount => {
                row.status = PoolStatus::Funded;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expired_open_pools(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AccountAddress>, StoreError> {
        self.ensure_up()?;
        let state = self.state.lock().await;
        let mut expired: Vec<(DateTime<Utc>, AccountAddress)> = state
            .pools
            .iter()
            .filter(|(address, row)| {
                row.status == PoolStatus::Open
                    && row.terms.expires_at < now
                    && state.incoming(address) < row.terms.target_amount
            })
            .map(|(address, row)| (row.terms.expires_at, address.clone()))
            .collect();
        expired.sort();
        Ok(expired.into_iter().take(limit).map(|(_, a)| a).collect())
    }

    async fn unreversed_contributions(
        &self,
        address: &AccountAddress,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.ensure_up()?;
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| state.is_unreversed_contribution(address, t))
            .cloned()
            .collect())
    }

    async fn mark_pool_refunded(
        &self,
        address: &AccountAddress,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.ensure_up()?;
        let mut state = self.state.lock().await;
        let outstanding = state
            .transactions
            .iter()
            .any(|t| state.is_unreversed_contribution(address, t));
        match state.pools.get_mut(address) {
            Some(row)
                if row.status == PoolStatus::Open
                    && row.terms.expires_at < now
                    && !outstanding =>
            {
                row.status = PoolStatus::Refunded;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl LimitStore for MemoryStore {
    async fn get_limit(
        &self,
        address: &AccountAddress,
    ) -> Result<Option<SpendingLimit>, StoreError> {
        self.ensure_up()?;
        Ok(self.state.lock().await.limits.get(address).cloned())
    }

    async fn upsert_limit(&self, limit: &SpendingLimit) -> Result<(), StoreError> {
        self.ensure_up()?;
        self.state
            .lock()
            .await
            .limits
            .insert(limit.address.clone(), limit.clone());
        Ok(())
    }

    async fn spent_in_period(
        &self,
        address: &AccountAddress,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<Amount, StoreError> {
        self.ensure_up()?;
        let state = self.state.lock().await;
        Ok(state.spent_since(address, period.window_start(now)))
    }
}

#[async_trait]
impl FeeStore for MemoryStore {
    async fn fee_tier_for(
        &self,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Option<FeeTier>, StoreError> {
        self.ensure_up()?;
        let state = self.state.lock().await;
        Ok(state
            .fee_tiers
            .iter()
            .find(|t| t.matches(amount, now))
            .cloned())
    }

    async fn active_fee_tiers(&self, now: DateTime<Utc>) -> Result<Vec<FeeTier>, StoreError> {
        self.ensure_up()?;
        let state = self.state.lock().await;
        Ok(state
            .fee_tiers
            .iter()
            .filter(|t| t.is_effective_at(now))
            .cloned()
            .collect())
    }

    async fn insert_fee_tier(&self, tier: &FeeTier) -> Result<(), StoreError> {
        self.ensure_up()?;
        self.state.lock().await.fee_tiers.push(tier.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limit::LimitWindow;
    use chrono::TimeZone;

    fn wallet(deposit: u64) -> Account {
        Account {
            address: AccountAddress::generate(),
            name: "w".into(),
            kind: AccountKind::Wallet,
            owners: vec![1],
            quorum: 1,
            total_owners: 2,
            active: true,
            initial_deposit: Amount::from_units(deposit),
            created_at: Utc::now(),
        }
    }

    fn commit(from: &Account, to: &Account, amount: u64) -> TransferCommit {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        TransferCommit {
            transaction: Transaction {
                id: TransactionId::new(),
                sender: from.address.clone(),
                receiver: to.address.clone(),
                amount: Amount::from_units(amount),
                fee: Amount::ZERO,
                created_at: now,
                signature: vec![],
                signer_fingerprint: None,
                reverses: None,
                committed_at: now,
            },
            limit: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_address_rejected() {
        let store = MemoryStore::new();
        let a = wallet(0);
        store.insert_account(&a).await.unwrap();
        assert!(matches!(
            store.insert_account(&a).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_moves_derived_balance() {
        let store = MemoryStore::new();
        let a = wallet(100);
        let b = wallet(0);
        store.insert_account(&a).await.unwrap();
        store.insert_account(&b).await.unwrap();

        store.commit_transfer(&commit(&a, &b, 30)).await.unwrap();

        assert_eq!(store.balance(&a.address).await.unwrap(), Amount::from_units(70));
        assert_eq!(store.balance(&b.address).await.unwrap(), Amount::from_units(30));
    }

    #[tokio::test]
    async fn test_commit_rejects_overdraft() {
        let store = MemoryStore::new();
        let a = wallet(10);
        let b = wallet(0);
        store.insert_account(&a).await.unwrap();
        store.insert_account(&b).await.unwrap();

        let err = store.commit_transfer(&commit(&a, &b, 11)).await.unwrap_err();
        assert_eq!(err, StoreError::Rejected(Rejection::InsufficientFunds));
        assert!(store.transactions_for(&a.address).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_rejects_frozen_receiver() {
        let store = MemoryStore::new();
        let a = wallet(10);
        let b = wallet(0);
        store.insert_account(&a).await.unwrap();
        store.insert_account(&b).await.unwrap();
        store.set_active(&b.address, false).await.unwrap();

        let err = store.commit_transfer(&commit(&a, &b, 1)).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Rejected(Rejection::AccountFrozen(b.address.clone()))
        );
    }

    #[tokio::test]
    async fn test_commit_enforces_limit_atomically() {
        let store = MemoryStore::new();
        let a = wallet(100);
        let b = wallet(0);
        store.insert_account(&a).await.unwrap();
        store.insert_account(&b).await.unwrap();

        let limit = Some(LimitWindow {
            period: Period::Day,
            cap: Amount::from_units(50),
        });
        let mut first = commit(&a, &b, 40);
        first.limit = limit;
        store.commit_transfer(&first).await.unwrap();

        let mut second = commit(&a, &b, 11);
        second.limit = limit;
        assert_eq!(
            store.commit_transfer(&second).await.unwrap_err(),
            StoreError::Rejected(Rejection::LimitExceeded)
        );
    }

    #[tokio::test]
    async fn test_owner_seats() {
        let store = MemoryStore::new();
        let a = wallet(0);
        store.insert_account(&a).await.unwrap();

        assert_eq!(store.add_owner(&a.address, 2).await.unwrap(), OwnerChange::Applied);
        assert_eq!(store.add_owner(&a.address, 2).await.unwrap(), OwnerChange::Unchanged);
        assert_eq!(store.add_owner(&a.address, 3).await.unwrap(), OwnerChange::SeatsFull);
        assert_eq!(store.remove_owner(&a.address, 1).await.unwrap(), OwnerChange::Applied);
        assert_eq!(store.remove_owner(&a.address, 2).await.unwrap(), OwnerChange::LastOwner);
    }

    #[tokio::test]
    async fn test_unavailable_is_retryable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.get_account(&AccountAddress::generate()).await.unwrap_err();
        assert!(err.is_retryable());

        store.set_unavailable(false);
        assert!(store.get_account(&AccountAddress::generate()).await.is_ok());
    }
}
