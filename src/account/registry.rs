//! AccountRegistry
//!
//! Every call goes to the store; ownership and the active flag are never
//! cached in process because authorization decisions need them fresh.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::error::AccountError;
use super::models::{Account, AccountKind, OwnerChange};
use super::validation::{AccountName, QuorumPolicy, ValidationError};
use crate::auth::signature::is_valid_public_key;
use crate::core_types::{AccountAddress, Clock, OwnerId};
use crate::money::Amount;
use crate::store::{Store, StoreError};

/// Fresh addresses tried before giving up on a create
pub const MAX_ADDRESS_ATTEMPTS: u32 = 5;

/// Primary key constraint that signals an address collision
pub(crate) const ADDRESS_CONSTRAINT: &str = "accounts_pkey";

pub struct AccountRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl AccountRegistry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create an account with `owner` as its sole initial owner.
    ///
    /// Account row and owner row are written in one store transaction.
    pub async fn create(
        &self,
        owner: OwnerId,
        name: &str,
        initial_deposit: Amount,
        quorum: i16,
        total_owners: i16,
    ) -> Result<Account, AccountError> {
        let name = AccountName::new(name)?;
        let policy = QuorumPolicy::new(quorum, total_owners)?;

        for attempt in 1..=MAX_ADDRESS_ATTEMPTS {
            let account = self.draft(owner, &name, AccountKind::Wallet, initial_deposit, policy);
            match self.store.insert_account(&account).await {
                Ok(()) => {
                    info!(
                        address = %account.address,
                        owner,
                        quorum,
                        total_owners,
                        initial_deposit = %initial_deposit,
                        "Account created"
                    );
                    return Ok(account);
                }
                Err(StoreError::Duplicate(c)) if c == ADDRESS_CONSTRAINT => {
                    warn!(attempt, "Address collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AccountError::AddressExhausted(MAX_ADDRESS_ATTEMPTS))
    }

    /// Build an unsaved account with a freshly generated address
    pub(crate) fn draft(
        &self,
        owner: OwnerId,
        name: &AccountName,
        kind: AccountKind,
        initial_deposit: Amount,
        policy: QuorumPolicy,
    ) -> Account {
        Account {
            address: AccountAddress::generate(),
            name: name.as_str().to_string(),
            kind,
            owners: vec![owner],
            quorum: policy.quorum(),
            total_owners: policy.total_owners(),
            active: true,
            initial_deposit,
            created_at: self.clock.now(),
        }
    }

    pub async fn add_owner(
        &self,
        actor: OwnerId,
        new_owner: OwnerId,
        address: &AccountAddress,
    ) -> Result<(), AccountError> {
        self.ensure_owner(actor, address).await?;

        match self
            .store
            .add_owner(address, new_owner)
            .await
            .map_err(|e| not_found_as(e, address))?
        {
            OwnerChange::Applied => {
                info!(address = %address, actor, new_owner, "Owner added");
                Ok(())
            }
            OwnerChange::Unchanged => Ok(()),
            OwnerChange::SeatsFull => {
                warn!(address = %address, actor, new_owner, "Owner add rejected: seats full");
                Err(AccountError::OwnerLimitReached(address.clone()))
            }
            // add never reports LastOwner
            OwnerChange::LastOwner => Ok(()),
        }
    }

    pub async fn remove_owner(
        &self,
        actor: OwnerId,
        target: OwnerId,
        address: &AccountAddress,
    ) -> Result<(), AccountError> {
        self.ensure_owner(actor, address).await?;

        match self
            .store
            .remove_owner(address, target)
            .await
            .map_err(|e| not_found_as(e, address))?
        {
            OwnerChange::Applied => {
                info!(address = %address, actor, target, "Owner removed");
                Ok(())
            }
            OwnerChange::Unchanged | OwnerChange::SeatsFull => Ok(()),
            OwnerChange::LastOwner => {
                warn!(address = %address, actor, target, "Owner removal rejected: last owner");
                Err(AccountError::LastOwner(address.clone()))
            }
        }
    }

    /// Idempotent: freezing a frozen account is not an error
    pub async fn freeze(&self, actor: OwnerId, address: &AccountAddress) -> Result<(), AccountError> {
        self.set_active(actor, address, false).await
    }

    /// Idempotent: activating an active account is not an error
    pub async fn activate(
        &self,
        actor: OwnerId,
        address: &AccountAddress,
    ) -> Result<(), AccountError> {
        self.set_active(actor, address, true).await
    }

    async fn set_active(
        &self,
        actor: OwnerId,
        address: &AccountAddress,
        active: bool,
    ) -> Result<(), AccountError> {
        self.ensure_owner(actor, address).await?;

        if !self.store.set_active(address, active).await? {
            return Err(AccountError::NotFound(address.clone()));
        }
        info!(address = %address, actor, active, "Account active flag set");
        Ok(())
    }

    pub async fn exists(&self, address: &AccountAddress) -> Result<bool, AccountError> {
        Ok(self.store.get_account(address).await?.is_some())
    }

    pub async fn owned_by(
        &self,
        user: OwnerId,
        address: &AccountAddress,
    ) -> Result<bool, AccountError> {
        Ok(self.store.is_owner(address, user).await?)
    }

    pub async fn get(&self, address: &AccountAddress) -> Result<Account, AccountError> {
        self.store
            .get_account(address)
            .await?
            .ok_or_else(|| AccountError::NotFound(address.clone()))
    }

    /// Derived balance, computed by the store
    pub async fn balance(&self, address: &AccountAddress) -> Result<Amount, AccountError> {
        self.store
            .balance(address)
            .await
            .map_err(|e| not_found_as(e, address))
    }

    /// Register or rotate the Ed25519 public key transfers by `owner` verify against
    pub async fn register_key(&self, owner: OwnerId, public_key: &[u8]) -> Result<(), AccountError> {
        if !is_valid_public_key(public_key) {
            return Err(ValidationError::InvalidPublicKey.into());
        }
        self.store.register_key(owner, public_key).await?;
        info!(owner, key = %hex::encode(public_key), "Public key registered");
        Ok(())
    }

    pub async fn public_key(&self, owner: OwnerId) -> Result<Option<Vec<u8>>, AccountError> {
        Ok(self.store.public_key(owner).await?)
    }

    async fn ensure_owner(
        &self,
        actor: OwnerId,
        address: &AccountAddress,
    ) -> Result<(), AccountError> {
        let account = self.get(address).await?;
        if !account.is_owned_by(actor) {
            debug!(address = %address, actor, "Actor is not an owner");
            return Err(AccountError::NotOwner {
                actor,
                address: address.clone(),
            });
        }
        Ok(())
    }
}

fn not_found_as(e: StoreError, address: &AccountAddress) -> AccountError {
    match e {
        StoreError::NotFound(_) => AccountError::NotFound(address.clone()),
        other => AccountError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::signature::generate_keypair;
    use crate::core_types::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn registry() -> (AccountRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        (AccountRegistry::new(store.clone(), clock), store)
    }

    #[tokio::test]
    async fn test_create_persists_account_and_owner() {
        let (registry, _) = registry();
        let account = registry
            .create(7, "Groceries", Amount::from_units(100), 1, 2)
            .await
            .unwrap();

        assert!(registry.exists(&account.address).await.unwrap());
        assert!(registry.owned_by(7, &account.address).await.unwrap());
        assert!(!registry.owned_by(8, &account.address).await.unwrap());
        assert_eq!(
            registry.balance(&account.address).await.unwrap(),
            Amount::from_units(100)
        );
        assert_eq!(
            account.created_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_create_validates_before_store() {
        let (registry, store) = registry();
        store.set_unavailable(true);

        let err = registry
            .create(7, "x", Amount::ZERO, 3, 2)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let err = registry.create(7, "", Amount::ZERO, 1, 1).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_create_addresses_are_unique() {
        let (registry, _) = registry();
        let a = registry.create(1, "a", Amount::ZERO, 1, 1).await.unwrap();
        let b = registry.create(1, "b", Amount::ZERO, 1, 1).await.unwrap();
        assert_ne!(a.address, b.address);
    }

    #[tokio::test]
    async fn test_owner_mutations_require_ownership() {
        let (registry, _) = registry();
        let account = registry.create(1, "shared", Amount::ZERO, 1, 3).await.unwrap();

        let err = registry.add_owner(2, 3, &account.address).await.unwrap_err();
        assert!(matches!(err, AccountError::NotOwner { actor: 2, .. }));

        registry.add_owner(1, 2, &account.address).await.unwrap();
        // re-adding is a no-op
        registry.add_owner(1, 2, &account.address).await.unwrap();
        assert!(registry.owned_by(2, &account.address).await.unwrap());

        // new owner may now act
        registry.remove_owner(2, 1, &account.address).await.unwrap();
        assert!(!registry.owned_by(1, &account.address).await.unwrap());

        let err = registry.remove_owner(1, 2, &account.address).await.unwrap_err();
        assert!(matches!(err, AccountError::NotOwner { actor: 1, .. }));
    }

    #[tokio::test]
    async fn test_owner_seat_bounds() {
        let (registry, _) = registry();
        let account = registry.create(1, "pair", Amount::ZERO, 1, 2).await.unwrap();

        registry.add_owner(1, 2, &account.address).await.unwrap();
        let err = registry.add_owner(1, 3, &account.address).await.unwrap_err();
        assert_eq!(err, AccountError::OwnerLimitReached(account.address.clone()));

        registry.remove_owner(1, 2, &account.address).await.unwrap();
        let err = registry.remove_owner(1, 1, &account.address).await.unwrap_err();
        assert_eq!(err, AccountError::LastOwner(account.address.clone()));
    }

    #[tokio::test]
    async fn test_freeze_and_activate_are_idempotent() {
        let (registry, _) = registry();
        let account = registry.create(1, "card", Amount::ZERO, 1, 1).await.unwrap();

        registry.freeze(1, &account.address).await.unwrap();
        registry.freeze(1, &account.address).await.unwrap();
        assert!(registry.get(&account.address).await.unwrap().is_frozen());

        registry.activate(1, &account.address).await.unwrap();
        registry.activate(1, &account.address).await.unwrap();
        assert!(!registry.get(&account.address).await.unwrap().is_frozen());

        let err = registry.freeze(99, &account.address).await.unwrap_err();
        assert_eq!(err.code(), "NOT_OWNER");
    }

    #[tokio::test]
    async fn test_unknown_address() {
        let (registry, _) = registry();
        let missing = AccountAddress::generate();

        assert!(!registry.exists(&missing).await.unwrap());
        assert_eq!(
            registry.freeze(1, &missing).await.unwrap_err(),
            AccountError::NotFound(missing.clone())
        );
        assert_eq!(
            registry.balance(&missing).await.unwrap_err(),
            AccountError::NotFound(missing)
        );
    }

    #[tokio::test]
    async fn test_register_key() {
        let (registry, _) = registry();
        let (_, public_key) = generate_keypair();

        registry.register_key(5, &public_key).await.unwrap();
        assert_eq!(
            registry.public_key(5).await.unwrap(),
            Some(public_key.to_vec())
        );

        let err = registry.register_key(5, &[1, 2, 3]).await.unwrap_err();
        assert_eq!(
            err,
            AccountError::Validation(ValidationError::InvalidPublicKey)
        );
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let (registry, store) = registry();
        let account = registry.create(1, "a", Amount::ZERO, 1, 1).await.unwrap();
        store.set_unavailable(true);

        let err = registry.get(&account.address).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
