//! TransactionAuthorizer
//!
//! Pipeline for one transfer:
//!
//! ```text
//! validate → load sender → load receiver → verify authorization
//!          → limit pre-check → fee lookup → atomic commit → notify
//! ```
//!
//! Everything before the commit is a read. The commit itself re-checks the
//! freeze flags, the sender balance, the spending limit and any cash pool
//! rules inside one store transaction, so a racing request that slips past
//! the pre-checks is still rejected there.
//!
//! Authorization is single-signer: accounts with `quorum > 1` are accepted
//! on one owner's signature.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::error::TransferError;
use super::notify::NotificationSink;
use super::types::{Authorization, FundRequest, Transaction, TransferEvent, TransferRequest};
use crate::account::Account;
use crate::auth::reversal_payload;
use crate::auth::signature::verify_transfer;
use crate::core_types::{AccountAddress, Clock, OwnerId, TransactionId};
use crate::fee::{FeeError, FeeSchedule};
use crate::limit::{LimitWindow, SpendingLimitGuard};
use crate::money::Amount;
use crate::store::{Store, TransferCommit};
use crate::system::SystemSigner;

pub struct TransactionAuthorizer {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    limits: Arc<SpendingLimitGuard>,
    fees: Arc<FeeSchedule>,
    signer: Arc<SystemSigner>,
    sink: Arc<dyn NotificationSink>,
    default_deadline: Option<Duration>,
}

impl TransactionAuthorizer {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        limits: Arc<SpendingLimitGuard>,
        fees: Arc<FeeSchedule>,
        signer: Arc<SystemSigner>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            clock,
            limits,
            fees,
            signer,
            sink,
            default_deadline: None,
        }
    }

    /// Bound every [`transfer`](Self::transfer) call by `deadline`
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }

    /// Authorize and commit a transfer
    pub async fn transfer(&self, request: TransferRequest) -> Result<Transaction, TransferError> {
        match self.default_deadline {
            Some(deadline) => self.transfer_within(request, deadline).await,
            None => self.execute(request).await,
        }
    }

    /// Like [`transfer`](Self::transfer) with an explicit deadline.
    ///
    /// On expiry the in-flight store transaction is dropped and rolls back;
    /// nothing partial is left behind.
    pub async fn transfer_within(
        &self,
        request: TransferRequest,
        deadline: Duration,
    ) -> Result<Transaction, TransferError> {
        let sender = request.sender.clone();
        match tokio::time::timeout(deadline, self.execute(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(sender = %sender, ?deadline, "Transfer deadline elapsed");
                Err(TransferError::Timeout)
            }
        }
    }

    async fn execute(&self, request: TransferRequest) -> Result<Transaction, TransferError> {
        let sender = request.sender.clone();
        let receiver = request.receiver.clone();
        let amount = request.amount;

        let result = self.authorize_and_commit(request).await;
        match &result {
            Ok(tx) => {
                info!(
                    transaction_id = %tx.id,
                    sender = %tx.sender,
                    receiver = %tx.receiver,
                    amount = %tx.amount,
                    fee = %tx.fee,
                    compensating = tx.is_compensating(),
                    "Transfer committed"
                );
                self.sink.publish(TransferEvent::from(tx));
            }
            Err(e) if e.is_rejection() => {
                warn!(sender = %sender, receiver = %receiver, amount = %amount, code = e.code(), "Transfer rejected");
            }
            Err(TransferError::LedgerRejected { reason }) => {
                error!(sender = %sender, receiver = %receiver, amount = %amount, reason, "Ledger rejected transfer");
            }
            Err(e) => {
                error!(sender = %sender, receiver = %receiver, amount = %amount, error = %e, "Transfer failed");
            }
        }
        result
    }

    async fn authorize_and_commit(
        &self,
        request: TransferRequest,
    ) -> Result<Transaction, TransferError> {
        let TransferRequest {
            sender,
            receiver,
            amount,
            created_at,
            authorization,
        } = request;

        // 1. input validation, no store access
        validate_parties(&sender, &receiver, amount)?;

        // 2-3. both accounts exist and are active
        let sender_account = self.load_active(&sender).await?;
        self.load_active(&receiver).await?;

        // 4. signature
        let (signature, signer_fingerprint, reverses, limit) = match authorization {
            Authorization::Owner { actor, signature } => {
                self.verify_owner(&sender_account, actor, &receiver, amount, created_at, &signature)
                    .await?;

                // 5. limit pre-check; the window goes to the commit as well
                if !self.limits.check(&sender, amount).await? {
                    return Err(TransferError::LimitExceeded);
                }
                let limit: Option<LimitWindow> = self.limits.limit_window(&sender).await?;
                (signature, None, None, limit)
            }
            Authorization::System {
                mac,
                key_fingerprint,
                reverses,
            } => {
                self.signer.resolve().await?;
                let payload = reversal_payload(&sender, &receiver, amount, created_at, reverses);
                if !self.signer.verify(&payload, &mac, &key_fingerprint) {
                    return Err(TransferError::InvalidSignature);
                }
                // Compensating transfers are not spending
                (mac, Some(key_fingerprint), Some(reverses), None)
            }
        };

        // 6. fee is recorded, not deducted
        let fee = match self.fees.lookup(amount).await {
            Ok(tier) => tier.fee,
            Err(FeeError::NotFound(_)) => {
                debug!(amount = %amount, "No fee tier, recording zero fee");
                Amount::ZERO
            }
            Err(e) => return Err(e.into()),
        };

        // 7. atomic commit
        let commit = TransferCommit {
            transaction: Transaction {
                id: TransactionId::new(),
                sender,
                receiver,
                amount,
                fee,
                created_at,
                signature,
                signer_fingerprint,
                reverses,
                committed_at: self.clock.now(),
            },
            limit,
        };
        Ok(self.store.commit_transfer(&commit).await?)
    }

    /// Record a request for `payer` to pay `requester`. No funds move.
    ///
    /// The actor must own `requester` and sign the canonical payload with
    /// `requester` in the sender slot and `payer` in the receiver slot.
    pub async fn request_funds(
        &self,
        actor: OwnerId,
        requester: &AccountAddress,
        payer: &AccountAddress,
        amount: Amount,
        created_at: DateTime<Utc>,
        signature: Vec<u8>,
    ) -> Result<FundRequest, TransferError> {
        validate_parties(requester, payer, amount)?;
        let requester_account = self.load_active(requester).await?;
        self.load_active(payer).await?;
        self.verify_owner(&requester_account, actor, payer, amount, created_at, &signature)
            .await?;

        let request = FundRequest {
            id: TransactionId::new(),
            requester: requester.clone(),
            payer: payer.clone(),
            amount,
            created_at,
            signature,
        };
        self.store.insert_fund_request(&request).await?;
        info!(
            request_id = %request.id,
            requester = %requester,
            payer = %payer,
            amount = %amount,
            "Fund request recorded"
        );
        Ok(request)
    }

    /// Committed transactions touching `address`, oldest first
    pub async fn history(&self, address: &AccountAddress) -> Result<Vec<Transaction>, TransferError> {
        Ok(self.store.transactions_for(address).await?)
    }

    /// Fund requests where `address` is requester or payer
    pub async fn pending_requests(
        &self,
        address: &AccountAddress,
    ) -> Result<Vec<FundRequest>, TransferError> {
        Ok(self.store.fund_requests_for(address).await?)
    }

    pub fn signer(&self) -> &Arc<SystemSigner> {
        &self.signer
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    async fn load_active(&self, address: &AccountAddress) -> Result<Account, TransferError> {
        let account = self
            .store
            .get_account(address)
            .await?
            .ok_or_else(|| TransferError::AccountNotFound(address.clone()))?;
        if account.is_frozen() {
            return Err(TransferError::AccountFrozen(address.clone()));
        }
        Ok(account)
    }

    async fn verify_owner(
        &self,
        account: &Account,
        actor: OwnerId,
        counterparty: &AccountAddress,
        amount: Amount,
        created_at: DateTime<Utc>,
        signature: &[u8],
    ) -> Result<(), TransferError> {
        if !account.is_owned_by(actor) {
            return Err(TransferError::NotOwner {
                actor,
                address: account.address.clone(),
            });
        }

        let Some(public_key) = self.store.public_key(actor).await? else {
            debug!(actor, "No public key registered");
            return Err(TransferError::InvalidSignature);
        };
        if !verify_transfer(&public_key, &account.address, counterparty, amount, created_at, signature) {
            return Err(TransferError::InvalidSignature);
        }
        Ok(())
    }
}

fn validate_parties(
    from: &AccountAddress,
    to: &AccountAddress,
    amount: Amount,
) -> Result<(), TransferError> {
    if amount.ensure_positive().is_err() {
        return Err(TransferError::InvalidAmount);
    }
    if from == to {
        return Err(TransferError::SameAccount);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountKind;
    use crate::auth::signature::{generate_keypair, sign_transfer};
    use crate::core_types::ManualClock;
    use crate::fee::FeeTier;
    use crate::limit::Period;
    use crate::store::{AccountStore, MemoryStore};
    use crate::transfer::notify::ChannelSink;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    const SECRET: &[u8] = b"test-system-secret-0123456789";

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        limits: Arc<SpendingLimitGuard>,
        fees: Arc<FeeSchedule>,
        authorizer: TransactionAuthorizer,
        events: mpsc::Receiver<TransferEvent>,
        alice_key: [u8; 32],
        a: AccountAddress,
        b: AccountAddress,
    }

    const ALICE: OwnerId = 1;
    const BOB: OwnerId = 2;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn account(owner: OwnerId, deposit: u64) -> Account {
        Account {
            address: AccountAddress::generate(),
            name: "acct".into(),
            kind: AccountKind::Wallet,
            owners: vec![owner],
            quorum: 1,
            total_owners: 1,
            active: true,
            initial_deposit: Amount::from_units(deposit),
            created_at: t0(),
        }
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let limits = Arc::new(SpendingLimitGuard::new(store.clone(), clock.clone()));
        let fees = Arc::new(FeeSchedule::new(store.clone(), clock.clone()));
        let signer = Arc::new(SystemSigner::new(store.clone(), clock.clone(), SECRET).unwrap());
        let (sink, events) = ChannelSink::new(16);

        let (alice_key, alice_pub) = generate_keypair();
        let (_, bob_pub) = generate_keypair();
        store.register_key(ALICE, &alice_pub).await.unwrap();
        store.register_key(BOB, &bob_pub).await.unwrap();

        let a = account(ALICE, 100);
        let b = account(BOB, 0);
        store.insert_account(&a).await.unwrap();
        store.insert_account(&b).await.unwrap();

        let authorizer = TransactionAuthorizer::new(
            store.clone(),
            clock.clone(),
            limits.clone(),
            fees.clone(),
            signer,
            Arc::new(sink),
        );

        Harness {
            store,
            clock,
            limits,
            fees,
            authorizer,
            events,
            alice_key,
            a: a.address,
            b: b.address,
        }
    }

    impl Harness {
        fn signed(&self, amount: u64) -> TransferRequest {
            let amount = Amount::from_units(amount);
            let sig = sign_transfer(&self.alice_key, &self.a, &self.b, amount, t0());
            TransferRequest::signed_by_owner(ALICE, self.a.clone(), self.b.clone(), amount, t0(), sig)
        }
    }

    #[tokio::test]
    async fn test_transfer_moves_balance_and_notifies() {
        let mut h = harness().await;

        let tx = h.authorizer.transfer(h.signed(30)).await.unwrap();
        assert_eq!(tx.amount, Amount::from_units(30));
        assert_eq!(tx.created_at, t0());
        assert_eq!(h.store.balance(&h.a).await.unwrap(), Amount::from_units(70));
        assert_eq!(h.store.balance(&h.b).await.unwrap(), Amount::from_units(30));

        let event = h.events.recv().await.unwrap();
        assert_eq!(event.transaction_id, tx.id);
        assert_eq!(event.key(), &h.b);
    }

    #[tokio::test]
    async fn test_overdraft_is_ledger_rejected() {
        let h = harness().await;
        h.authorizer.transfer(h.signed(30)).await.unwrap();

        let err = h.authorizer.transfer(h.signed(80)).await.unwrap_err();
        assert_eq!(
            err,
            TransferError::LedgerRejected {
                reason: "INSUFFICIENT_FUNDS"
            }
        );
        assert_eq!(h.store.balance(&h.a).await.unwrap(), Amount::from_units(70));
        assert_eq!(h.store.balance(&h.b).await.unwrap(), Amount::from_units(30));
    }

    #[tokio::test]
    async fn test_validation_precedes_store_access() {
        let h = harness().await;
        h.store.set_unavailable(true);

        let zero = TransferRequest::signed_by_owner(ALICE, h.a.clone(), h.b.clone(), Amount::ZERO, t0(), vec![]);
        assert_eq!(h.authorizer.transfer(zero).await.unwrap_err(), TransferError::InvalidAmount);

        let same = TransferRequest::signed_by_owner(ALICE, h.a.clone(), h.a.clone(), Amount::from_units(1), t0(), vec![]);
        assert_eq!(h.authorizer.transfer(same).await.unwrap_err(), TransferError::SameAccount);
    }

    #[tokio::test]
    async fn test_tampered_amount_rejected() {
        let h = harness().await;
        let mut req = h.signed(10);
        req.amount = Amount::from_units(11);

        assert_eq!(h.authorizer.transfer(req).await.unwrap_err(), TransferError::InvalidSignature);
        assert!(h.authorizer.history(&h.a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_signature_rejected() {
        let h = harness().await;
        let req = TransferRequest::signed_by_owner(
            ALICE,
            h.a.clone(),
            h.b.clone(),
            Amount::from_units(1),
            t0(),
            vec![1, 2, 3],
        );
        assert_eq!(h.authorizer.transfer(req).await.unwrap_err(), TransferError::InvalidSignature);
    }

    #[tokio::test]
    async fn test_actor_must_own_sender() {
        let h = harness().await;
        let mut req = h.signed(10);
        req.authorization = match req.authorization {
            Authorization::Owner { signature, .. } => Authorization::Owner { actor: BOB, signature },
            other => other,
        };

        assert!(matches!(
            h.authorizer.transfer(req).await.unwrap_err(),
            TransferError::NotOwner { actor: BOB, .. }
        ));
    }

    #[tokio::test]
    async fn test_frozen_receiver_rejected() {
        let h = harness().await;
        h.store.set_active(&h.b, false).await.unwrap();

        assert_eq!(
            h.authorizer.transfer(h.signed(10)).await.unwrap_err(),
            TransferError::AccountFrozen(h.b.clone())
        );
    }

    #[tokio::test]
    async fn test_unknown_receiver_rejected() {
        let h = harness().await;
        let ghost = AccountAddress::generate();
        let sig = sign_transfer(&h.alice_key, &h.a, &ghost, Amount::from_units(1), t0());
        let req = TransferRequest::signed_by_owner(ALICE, h.a.clone(), ghost.clone(), Amount::from_units(1), t0(), sig);

        assert_eq!(h.authorizer.transfer(req).await.unwrap_err(), TransferError::AccountNotFound(ghost));
    }

    #[tokio::test]
    async fn test_limit_exceeded() {
        let h = harness().await;
        h.limits.set_limit(ALICE, &h.a, Period::Day, Amount::from_units(50)).await.unwrap();

        h.authorizer.transfer(h.signed(30)).await.unwrap();
        h.authorizer.transfer(h.signed(20)).await.unwrap();
        assert_eq!(h.authorizer.transfer(h.signed(1)).await.unwrap_err(), TransferError::LimitExceeded);

        // next calendar day
        h.clock.advance(chrono::Duration::days(1));
        h.authorizer.transfer(h.signed(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_racing_transfers_cannot_overshoot_limit() {
        let h = harness().await;
        h.limits.set_limit(ALICE, &h.a, Period::Day, Amount::from_units(50)).await.unwrap();
        let authorizer = Arc::new(h.authorizer);

        let attempts = (0..5).map(|_| {
            let authorizer = authorizer.clone();
            let amount = Amount::from_units(20);
            let sig = sign_transfer(&h.alice_key, &h.a, &h.b, amount, t0());
            let req = TransferRequest::signed_by_owner(ALICE, h.a.clone(), h.b.clone(), amount, t0(), sig);
            tokio::spawn(async move { authorizer.transfer(req).await })
        });
        let results = futures::future::join_all(attempts).await;
        let committed = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();

        assert_eq!(committed, 2);
        assert_eq!(h.store.balance(&h.b).await.unwrap(), Amount::from_units(40));
    }

    #[tokio::test]
    async fn test_fee_recorded_not_deducted() {
        let h = harness().await;
        h.fees
            .add_tier(FeeTier {
                min_amount: Amount::from_units(1),
                max_amount: Amount::from_units(1_000),
                fee: Amount::from_units(2),
                effective_from: t0(),
                effective_to: t0() + chrono::Duration::days(365),
            })
            .await
            .unwrap();

        let tx = h.authorizer.transfer(h.signed(30)).await.unwrap();
        assert_eq!(tx.fee, Amount::from_units(2));
        assert_eq!(h.store.balance(&h.b).await.unwrap(), Amount::from_units(30));
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let h = harness().await;
        h.store.set_unavailable(true);

        let err = h.authorizer.transfer(h.signed(1)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_system_authorization_requires_valid_mac() {
        let h = harness().await;
        h.authorizer.signer().bootstrap().await.unwrap();

        let forged = TransferRequest {
            sender: h.a.clone(),
            receiver: h.b.clone(),
            amount: Amount::from_units(5),
            created_at: t0(),
            authorization: Authorization::System {
                mac: vec![0; 32],
                key_fingerprint: h.authorizer.signer().fingerprint().to_string(),
                reverses: TransactionId::new(),
            },
        };
        assert_eq!(h.authorizer.transfer(forged).await.unwrap_err(), TransferError::InvalidSignature);
    }

    #[tokio::test]
    async fn test_system_authorization_without_bootstrap() {
        let h = harness().await;
        let req = TransferRequest {
            sender: h.a.clone(),
            receiver: h.b.clone(),
            amount: Amount::from_units(5),
            created_at: t0(),
            authorization: Authorization::System {
                mac: vec![],
                key_fingerprint: String::new(),
                reverses: TransactionId::new(),
            },
        };
        assert_eq!(h.authorizer.transfer(req).await.unwrap_err(), TransferError::SystemUserMissing);
    }

    #[tokio::test]
    async fn test_deadline() {
        let h = harness().await;
        let tx = h
            .authorizer
            .transfer_within(h.signed(5), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(tx.amount, Amount::from_units(5));

        let err = h
            .authorizer
            .transfer_within(h.signed(5), Duration::ZERO)
            .await;
        // A zero deadline may still win the race on an uncontended store
        assert!(matches!(err, Ok(_) | Err(TransferError::Timeout)));
    }

    #[tokio::test]
    async fn test_unbounded_deadline() {
        let h = harness().await;
        let tx = h
            .authorizer
            .transfer_within(h.signed(5), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(tx.amount, Amount::from_units(5));
    }

    #[tokio::test]
    async fn test_request_funds_records_without_moving_money() {
        let h = harness().await;
        let amount = Amount::from_units(25);
        let sig = sign_transfer(&h.alice_key, &h.a, &h.b, amount, t0());

        let request = h
            .authorizer
            .request_funds(ALICE, &h.a, &h.b, amount, t0(), sig)
            .await
            .unwrap();

        assert_eq!(h.authorizer.pending_requests(&h.b).await.unwrap(), vec![request]);
        assert_eq!(h.store.balance(&h.a).await.unwrap(), Amount::from_units(100));
        assert!(h.authorizer.history(&h.a).await.unwrap().is_empty());

        let err = h
            .authorizer
            .request_funds(ALICE, &h.a, &h.b, amount, t0(), vec![0; 64])
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::InvalidSignature);
    }
}
