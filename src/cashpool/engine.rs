//! CashPoolEngine
//!
//! A cash pool is an account with a funding target, a payout receiver and an
//! expiry. Every status change is a conditional update in the store:
//!
//! - `OPEN → FUNDED` inside the store transaction of the transfer that
//!   brings collected to target, whichever path submitted it
//! - `OPEN → REFUNDED` after every contribution of an expired, under-funded
//!   pool has been reversed
//!
//! Refunds are system-signed compensating transfers routed through the
//! authorizer. Each carries `reverses = <original id>`, which the store keeps
//! unique, so a contribution is refunded at most once however often a sweep
//! is retried.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::error::PoolError;
use super::models::{CashPool, PoolStatus, PoolTerms};
use crate::account::{AccountKind, AccountName, AccountRegistry, QuorumPolicy};
use crate::account::registry::{ADDRESS_CONSTRAINT, MAX_ADDRESS_ATTEMPTS};
use crate::core_types::{AccountAddress, Clock, OwnerId};
use crate::money::Amount;
use crate::store::{Rejection, Store, StoreError};
use crate::transfer::{Authorization, Transaction, TransactionAuthorizer, TransferError, TransferRequest};

/// Default number of expired pools returned per sweep
pub const DEFAULT_SWEEP_BATCH: usize = 100;

/// Result of a successful deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deposit {
    pub transaction: Transaction,
    /// True only for the deposit that flipped the pool to FUNDED. False if
    /// the pool could not be read back; the stored status is authoritative.
    pub funded: bool,
}

/// Result of a refund pass over one pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReport {
    pub pool: AccountAddress,
    /// Compensating transactions issued by this pass
    pub issued: Vec<Transaction>,
    /// True if this pass (or an earlier one) left the pool REFUNDED
    pub refunded: bool,
}

/// Outcome of one sweep-and-refund cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub refunded: usize,
    pub compensations: usize,
    pub failed: usize,
}

pub struct CashPoolEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    registry: Arc<AccountRegistry>,
    authorizer: Arc<TransactionAuthorizer>,
    sweep_batch: usize,
}

impl CashPoolEngine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        registry: Arc<AccountRegistry>,
        authorizer: Arc<TransactionAuthorizer>,
    ) -> Self {
        Self {
            store,
            clock,
            registry,
            authorizer,
            sweep_batch: DEFAULT_SWEEP_BATCH,
        }
    }

    pub fn with_sweep_batch(mut self, batch: usize) -> Self {
        self.sweep_batch = batch.max(1);
        self
    }

    /// Create an open pool with `creator` as sole owner
    pub async fn create(
        &self,
        creator: OwnerId,
        name: &str,
        description: &str,
        target_amount: Amount,
        receiver: &AccountAddress,
        expires_at: DateTime<Utc>,
    ) -> Result<CashPool, PoolError> {
        let name = AccountName::new(name)?;
        if target_amount.ensure_positive().is_err() {
            return Err(PoolError::InvalidTarget);
        }
        if expires_at <= self.clock.now() {
            return Err(PoolError::ExpiryInPast);
        }
        if self.store.get_account(receiver).await?.is_none() {
            return Err(PoolError::ReceiverNotFound(receiver.clone()));
        }

        let terms = PoolTerms {
            description: description.trim().to_string(),
            target_amount,
            receiver: receiver.clone(),
            expires_at,
        };

        for attempt in 1..=MAX_ADDRESS_ATTEMPTS {
            let account = self.registry.draft(
                creator,
                &name,
                AccountKind::CashPool,
                Amount::ZERO,
                QuorumPolicy::single(),
            );
            match self.store.insert_pool(&account, &terms).await {
                Ok(()) => {
                    info!(
                        address = %account.address,
                        creator,
                        target = %target_amount,
                        receiver = %receiver,
                        expires_at = %expires_at,
                        "Cash pool created"
                    );
                    return Ok(CashPool {
                        account,
                        terms,
                        status: PoolStatus::Open,
                        collected: Amount::ZERO,
                        funded_by: None,
                    });
                }
                Err(StoreError::Duplicate(c)) if c == ADDRESS_CONSTRAINT => {
                    warn!(attempt, "Address collision, regenerating");
                }
                Err(StoreError::NotFound(_)) => {
                    return Err(PoolError::ReceiverNotFound(receiver.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(PoolError::AddressExhausted(MAX_ADDRESS_ATTEMPTS))
    }

    pub async fn get(&self, address: &AccountAddress) -> Result<CashPool, PoolError> {
        self.store
            .get_pool(address)
            .await?
            .ok_or_else(|| PoolError::NotFound(address.clone()))
    }

    /// A normal transfer into the pool. The store flips the pool to FUNDED in
    /// the same commit when this deposit completes the target.
    ///
    /// The store rejects deposits into closed pools and deposits that would
    /// overshoot the target, so collected never exceeds target.
    pub async fn deposit(&self, request: TransferRequest) -> Result<Deposit, PoolError> {
        let pool = self.get(&request.receiver).await?;
        if pool.status != PoolStatus::Open || pool.is_expired_at(self.clock.now()) {
            return Err(PoolError::Closed(pool.address().clone()));
        }

        let transaction = self
            .authorizer
            .transfer(request)
            .await
            .map_err(|e| deposit_error(e, pool.address()))?;

        // Committed; a failed read-back is logged, not returned
        let funded = match self.store.get_pool(pool.address()).await {
            Ok(Some(view)) => view.funded_by == Some(transaction.id),
            Ok(None) => false,
            Err(e) => {
                error!(pool = %pool.address(), error = %e, "Pool read failed after deposit");
                false
            }
        };
        if funded {
            info!(pool = %pool.address(), transaction_id = %transaction.id, "Cash pool funded");
        }
        Ok(Deposit {
            transaction,
            funded,
        })
    }

    /// Flip `OPEN → FUNDED` if collected ≥ target. Transfers already flip
    /// in their commit; this repairs pools whose rows were written otherwise.
    /// True only for the caller that performed the flip.
    pub async fn settle(&self, address: &AccountAddress) -> Result<bool, PoolError> {
        let flipped = self.store.mark_pool_funded(address, self.clock.now()).await?;
        if flipped {
            info!(pool = %address, "Cash pool funded");
        }
        Ok(flipped)
    }

    /// Open pools past expiry whose collected amount is below target
    pub async fn sweep_expired(&self) -> Result<Vec<AccountAddress>, PoolError> {
        let expired = self
            .store
            .expired_open_pools(self.clock.now(), self.sweep_batch)
            .await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "Found expired cash pools");
        }
        Ok(expired)
    }

    /// Reverse every unreversed contribution, then flip to REFUNDED.
    ///
    /// If any reversal fails the pool stays OPEN and the error reports how
    /// many were issued; the next sweep picks up the remainder.
    pub async fn refund(&self, address: &AccountAddress) -> Result<RefundReport, PoolError> {
        let pool = self.get(address).await?;
        let now = self.clock.now();

        match pool.status {
            PoolStatus::Refunded => {
                return Ok(RefundReport {
                    pool: address.clone(),
                    issued: Vec::new(),
                    refunded: true,
                });
            }
            PoolStatus::Funded => {
                return Err(PoolError::InvalidState {
                    address: address.clone(),
                    status: pool.status,
                });
            }
            PoolStatus::Open => {}
        }
        if !pool.is_expired_at(now) {
            return Err(PoolError::NotExpired(address.clone()));
        }
        if pool.collected >= pool.terms.target_amount {
            // Reached target without the flip (rows written outside commit_transfer)
            self.settle(address).await?;
            return Err(PoolError::InvalidState {
                address: address.clone(),
                status: PoolStatus::Funded,
            });
        }

        let signer = self.authorizer.signer();
        signer.resolve().await.map_err(TransferError::from)?;

        let contributions = self.store.unreversed_contributions(address).await?;
        debug!(pool = %address, count = contributions.len(), "Refunding contributions");

        let mut issued = Vec::with_capacity(contributions.len());
        let mut failed = 0;
        for original in contributions {
            let created_at = self.clock.now();
            let (mac, key_fingerprint) = signer
                .sign_reversal(address, &original.sender, original.amount, created_at, original.id)
                .map_err(TransferError::from)?;

            let request = TransferRequest {
                sender: address.clone(),
                receiver: original.sender.clone(),
                amount: original.amount,
                created_at,
                authorization: Authorization::System {
                    mac,
                    key_fingerprint,
                    reverses: original.id,
                },
            };

            match self.authorizer.transfer(request).await {
                Ok(tx) => issued.push(tx),
                Err(TransferError::LedgerRejected { reason })
                    if reason == Rejection::AlreadyReversed.code() =>
                {
                    debug!(original = %original.id, "Contribution already reversed");
                }
                Err(e) => {
                    warn!(
                        pool = %address,
                        original = %original.id,
                        contributor = %original.sender,
                        error = %e,
                        "Refund transfer failed, will retry next sweep"
                    );
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(PoolError::RefundIncomplete {
                pool: address.clone(),
                issued: issued.len(),
                failed,
            });
        }

        let refunded = self.store.mark_pool_refunded(address, self.clock.now()).await?;
        if refunded {
            info!(pool = %address, compensations = issued.len(), "Cash pool refunded");
        }
        Ok(RefundReport {
            pool: address.clone(),
            issued,
            refunded,
        })
    }

    /// One scheduler cycle: find expired pools and refund each. A failing
    /// pool is logged and left for the next cycle.
    pub async fn sweep_and_refund(&self) -> Result<SweepReport, PoolError> {
        let expired = self.sweep_expired().await?;
        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };

        for address in expired {
            match self.refund(&address).await {
                Ok(r) => {
                    report.compensations += r.issued.len();
                    if r.refunded {
                        report.refunded += 1;
                    }
                }
                Err(e) => {
                    error!(pool = %address, code = e.code(), error = %e, "Cash pool refund failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

fn deposit_error(e: TransferError, pool: &AccountAddress) -> PoolError {
    match e {
        TransferError::LedgerRejected { reason } if reason == Rejection::PoolClosed.code() => {
            PoolError::Closed(pool.clone())
        }
        TransferError::LedgerRejected { reason }
            if reason == Rejection::PoolTargetExceeded.code() =>
        {
            PoolError::TargetExceeded(pool.clone())
        }
        other => PoolError::Transfer(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::signature::{generate_keypair, sign_transfer};
    use crate::core_types::ManualClock;
    use crate::fee::FeeSchedule;
    use crate::limit::SpendingLimitGuard;
    use crate::store::{AccountStore, MemoryStore};
    use crate::system::SystemSigner;
    use crate::transfer::{LogSink, NotificationSink, TransferEvent};
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

    const SECRET: &[u8] = b"pool-engine-test-secret-000000";

    struct Owner {
        id: OwnerId,
        key: [u8; 32],
        wallet: AccountAddress,
    }

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        registry: Arc<AccountRegistry>,
        engine: CashPoolEngine,
        payee: AccountAddress,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    /// Takes the store offline on the next published event, i.e. right
    /// after a commit and before the caller reads anything back
    struct OutageAfterCommit {
        store: Arc<MemoryStore>,
        armed: AtomicBool,
    }

    impl NotificationSink for OutageAfterCommit {
        fn publish(&self, _event: TransferEvent) {
            if self.armed.swap(false, Ordering::AcqRel) {
                self.store.set_unavailable(true);
            }
        }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(MemoryStore::new()), Arc::new(LogSink)).await
    }

    async fn harness_with(store: Arc<MemoryStore>, sink: Arc<dyn NotificationSink>) -> Harness {
        let clock = Arc::new(ManualClock::new(t0()));
        let registry = Arc::new(AccountRegistry::new(store.clone(), clock.clone()));
        let limits = Arc::new(SpendingLimitGuard::new(store.clone(), clock.clone()));
        let fees = Arc::new(FeeSchedule::new(store.clone(), clock.clone()));
        let signer = Arc::new(SystemSigner::new(store.clone(), clock.clone(), SECRET).unwrap());
        signer.bootstrap().await.unwrap();
        let authorizer = Arc::new(TransactionAuthorizer::new(
            store.clone(),
            clock.clone(),
            limits,
            fees,
            signer,
            sink,
        ));
        let engine = CashPoolEngine::new(store.clone(), clock.clone(), registry.clone(), authorizer);
        let payee = registry.create(99, "payee", Amount::ZERO, 1, 1).await.unwrap().address;

        Harness {
            store,
            clock,
            registry,
            engine,
            payee,
        }
    }

    impl Harness {
        async fn owner(&self, id: OwnerId, deposit: u64) -> Owner {
            let (key, public) = generate_keypair();
            self.registry.register_key(id, &public).await.unwrap();
            let wallet = self
                .registry
                .create(id, "wallet", Amount::from_units(deposit), 1, 1)
                .await
                .unwrap()
                .address;
            Owner { id, key, wallet }
        }

        async fn pool(&self, target: u64) -> AccountAddress {
            self.engine
                .create(1, "Gift", "team gift", Amount::from_units(target), &self.payee, t0() + Duration::days(7))
                .await
                .unwrap()
                .address()
                .clone()
        }

        fn deposit_request(&self, from: &Owner, pool: &AccountAddress, amount: u64) -> TransferRequest {
            let amount = Amount::from_units(amount);
            let at = self.clock.now();
            let sig = sign_transfer(&from.key, &from.wallet, pool, amount, at);
            TransferRequest::signed_by_owner(from.id, from.wallet.clone(), pool.clone(), amount, at, sig)
        }
    }

    #[tokio::test]
    async fn test_create_validation() {
        let h = harness().await;
        let later = t0() + Duration::days(1);

        assert_eq!(
            h.engine.create(1, "p", "", Amount::ZERO, &h.payee, later).await.unwrap_err(),
            PoolError::InvalidTarget
        );
        assert_eq!(
            h.engine.create(1, "p", "", Amount::from_units(5), &h.payee, t0()).await.unwrap_err(),
            PoolError::ExpiryInPast
        );
        let ghost = AccountAddress::generate();
        assert_eq!(
            h.engine.create(1, "p", "", Amount::from_units(5), &ghost, later).await.unwrap_err(),
            PoolError::ReceiverNotFound(ghost)
        );
    }

    #[tokio::test]
    async fn test_pool_funds_exactly_once() {
        let h = harness().await;
        let alice = h.owner(1, 100).await;
        let pool = h.pool(50).await;

        let first = h.engine.deposit(h.deposit_request(&alice, &pool, 30)).await.unwrap();
        assert!(!first.funded);
        let second = h.engine.deposit(h.deposit_request(&alice, &pool, 20)).await.unwrap();
        assert!(second.funded);

        let view = h.engine.get(&pool).await.unwrap();
        assert_eq!(view.status, PoolStatus::Funded);
        assert_eq!(view.collected, Amount::from_units(50));

        assert_eq!(
            h.engine.deposit(h.deposit_request(&alice, &pool, 1)).await.unwrap_err(),
            PoolError::Closed(pool.clone())
        );
        assert!(!h.engine.settle(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_direct_transfer_into_pool_flips_funded() {
        let h = harness().await;
        let alice = h.owner(1, 100).await;
        let pool = h.pool(50).await;

        // Submitted straight to the authorizer, bypassing deposit()
        let tx = h
            .engine
            .authorizer
            .transfer(h.deposit_request(&alice, &pool, 50))
            .await
            .unwrap();

        let view = h.engine.get(&pool).await.unwrap();
        assert_eq!(view.status, PoolStatus::Funded);
        assert_eq!(view.funded_by, Some(tx.id));
        assert!(!h.engine.settle(&pool).await.unwrap());

        h.clock.advance(Duration::days(8));
        let report = h.engine.sweep_and_refund().await.unwrap();
        assert_eq!(report, SweepReport::default());

        // pool creator (alice, owner 1) pays out to the receiver
        let amount = Amount::from_units(50);
        let at = h.clock.now();
        let sig = sign_transfer(&alice.key, &pool, &h.payee, amount, at);
        h.engine
            .authorizer
            .transfer(TransferRequest::signed_by_owner(1, pool.clone(), h.payee.clone(), amount, at, sig))
            .await
            .unwrap();
        assert_eq!(h.store.balance(&h.payee).await.unwrap(), amount);
    }

    #[tokio::test]
    async fn test_funded_flip_survives_outage_after_commit() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(OutageAfterCommit {
            store: store.clone(),
            armed: AtomicBool::new(false),
        });
        let h = harness_with(store.clone(), sink.clone()).await;
        let alice = h.owner(1, 100).await;
        let pool = h.pool(40).await;

        sink.armed.store(true, Ordering::Release);
        let deposit = h.engine.deposit(h.deposit_request(&alice, &pool, 40)).await.unwrap();
        // read-back failed, so the caller cannot tell it flipped the pool
        assert!(!deposit.funded);
        assert!(h.engine.get(&pool).await.is_err());

        store.set_unavailable(false);
        let view = h.engine.get(&pool).await.unwrap();
        assert_eq!(view.status, PoolStatus::Funded);
        assert_eq!(view.funded_by, Some(deposit.transaction.id));
        assert_eq!(
            h.engine.deposit(h.deposit_request(&alice, &pool, 1)).await.unwrap_err(),
            PoolError::Closed(pool)
        );
    }

    #[tokio::test]
    async fn test_overshooting_deposit_rejected() {
        let h = harness().await;
        let alice = h.owner(1, 100).await;
        let pool = h.pool(50).await;

        assert_eq!(
            h.engine.deposit(h.deposit_request(&alice, &pool, 60)).await.unwrap_err(),
            PoolError::TargetExceeded(pool.clone())
        );
        assert_eq!(h.engine.get(&pool).await.unwrap().collected, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_deposit_after_expiry_rejected() {
        let h = harness().await;
        let alice = h.owner(1, 100).await;
        let pool = h.pool(50).await;
        h.clock.advance(Duration::days(8));

        assert_eq!(
            h.engine.deposit(h.deposit_request(&alice, &pool, 10)).await.unwrap_err(),
            PoolError::Closed(pool)
        );
    }

    #[tokio::test]
    async fn test_refund_reverses_each_contribution() {
        let h = harness().await;
        let alice = h.owner(1, 100).await;
        let bob = h.owner(2, 100).await;
        let pool = h.pool(100).await;

        let a = h.engine.deposit(h.deposit_request(&alice, &pool, 30)).await.unwrap().transaction;
        let b = h.engine.deposit(h.deposit_request(&bob, &pool, 20)).await.unwrap().transaction;

        assert_eq!(h.engine.refund(&pool).await.unwrap_err(), PoolError::NotExpired(pool.clone()));

        h.clock.advance(Duration::days(8));
        assert_eq!(h.engine.sweep_expired().await.unwrap(), vec![pool.clone()]);

        let report = h.engine.refund(&pool).await.unwrap();
        assert!(report.refunded);
        assert_eq!(report.issued.len(), 2);
        for original in [&a, &b] {
            let reversal = report.issued.iter().find(|t| t.reverses == Some(original.id)).unwrap();
            assert_eq!(reversal.sender, original.receiver);
            assert_eq!(reversal.receiver, original.sender);
            assert_eq!(reversal.amount, original.amount);
            assert!(reversal.signer_fingerprint.is_some());
        }

        assert_eq!(h.store.balance(&alice.wallet).await.unwrap(), Amount::from_units(100));
        assert_eq!(h.store.balance(&bob.wallet).await.unwrap(), Amount::from_units(100));
        assert_eq!(h.engine.get(&pool).await.unwrap().status, PoolStatus::Refunded);
        assert!(h.engine.sweep_expired().await.unwrap().is_empty());

        // idempotent
        let again = h.engine.refund(&pool).await.unwrap();
        assert!(again.issued.is_empty());
    }

    #[tokio::test]
    async fn test_partial_refund_retried_next_sweep() {
        let h = harness().await;
        let alice = h.owner(1, 100).await;
        let bob = h.owner(2, 100).await;
        let pool = h.pool(100).await;

        h.engine.deposit(h.deposit_request(&alice, &pool, 30)).await.unwrap();
        h.engine.deposit(h.deposit_request(&bob, &pool, 20)).await.unwrap();
        h.clock.advance(Duration::days(8));

        h.registry.freeze(2, &bob.wallet).await.unwrap();
        let report = h.engine.sweep_and_refund().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(h.engine.get(&pool).await.unwrap().status, PoolStatus::Open);
        assert_eq!(h.store.balance(&alice.wallet).await.unwrap(), Amount::from_units(100));

        h.registry.activate(2, &bob.wallet).await.unwrap();
        let report = h.engine.sweep_and_refund().await.unwrap();
        assert_eq!(report.refunded, 1);
        assert_eq!(report.compensations, 1);

        // alice was refunded once, not twice
        assert_eq!(h.store.balance(&alice.wallet).await.unwrap(), Amount::from_units(100));
        assert_eq!(h.store.balance(&bob.wallet).await.unwrap(), Amount::from_units(100));
        assert_eq!(h.store.balance(&pool).await.unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_funded_pool_pays_only_receiver() {
        let h = harness().await;
        let alice = h.owner(1, 100).await;
        let pool = h.pool(40).await;
        h.engine.deposit(h.deposit_request(&alice, &pool, 40)).await.unwrap();

        assert_eq!(
            h.engine.refund(&pool).await.unwrap_err().code(),
            "INVALID_POOL_STATE"
        );
        // an empty pool has nothing to refund
        let empty = h.pool(10).await;
        h.clock.advance(Duration::days(8));
        assert!(h.engine.refund(&empty).await.unwrap().refunded);
    }

    #[tokio::test]
    async fn test_refund_without_system_identity() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let registry = Arc::new(AccountRegistry::new(store.clone(), clock.clone()));
        let signer = Arc::new(SystemSigner::new(store.clone(), clock.clone(), SECRET).unwrap());
        let authorizer = Arc::new(TransactionAuthorizer::new(
            store.clone(),
            clock.clone(),
            Arc::new(SpendingLimitGuard::new(store.clone(), clock.clone())),
            Arc::new(FeeSchedule::new(store.clone(), clock.clone())),
            signer,
            Arc::new(LogSink),
        ));
        let engine = CashPoolEngine::new(store.clone(), clock.clone(), registry.clone(), authorizer);
        let payee = registry.create(9, "payee", Amount::ZERO, 1, 1).await.unwrap();
        let pool = engine
            .create(1, "p", "", Amount::from_units(5), &payee.address, t0() + Duration::hours(1))
            .await
            .unwrap();
        clock.advance(Duration::hours(2));

        let err = engine.refund(pool.address()).await.unwrap_err();
        assert_eq!(err, PoolError::Transfer(TransferError::SystemUserMissing));
        assert!(store.get_account(pool.address()).await.unwrap().is_some());
    }
}
