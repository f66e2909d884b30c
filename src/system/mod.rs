//! SystemSigner
//!
//! Owns the singleton system identity (the one account with
//! [`AccountKind::System`]) and the secret used to MAC compensating
//! transactions. The identity is resolved lazily and cached for the life of
//! the signer; it is never invalidated because the system account is never
//! deleted or re-keyed while the process runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::account::{Account, AccountKind};
use crate::auth::reversal_payload;
use crate::core_types::{AccountAddress, Clock, OwnerId, TransactionId};
use crate::money::Amount;
use crate::store::{Store, StoreError};

type HmacSha256 = Hmac<Sha256>;

/// Owner id recorded on the system account
pub const SYSTEM_OWNER_ID: OwnerId = 0;

pub const SYSTEM_ACCOUNT_NAME: &str = "system";

/// Minimum secret length accepted by [`SystemSigner::new`]
pub const MIN_SECRET_LEN: usize = 16;

/// Hex digits of SHA-256(secret) exposed as the key fingerprint
const FINGERPRINT_HEX_LEN: usize = 16;

const SINGLE_SYSTEM_CONSTRAINT: &str = "accounts_single_system";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("System identity not found; run bootstrap first")]
    SystemUserMissing,

    #[error("Invalid system key: {0}")]
    InvalidKey(&'static str),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SignerError {
    pub fn code(&self) -> &'static str {
        match self {
            SignerError::SystemUserMissing => "SYSTEM_USER_MISSING",
            SignerError::InvalidKey(_) => "INVALID_SYSTEM_KEY",
            SignerError::Store(StoreError::Unavailable(_)) => "SERVICE_UNAVAILABLE",
            SignerError::Store(_) => "DATABASE_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SignerError::Store(e) if e.is_retryable())
    }
}

/// The resolved system account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIdentity {
    pub address: AccountAddress,
    pub name: String,
}

impl From<&Account> for SystemIdentity {
    fn from(account: &Account) -> Self {
        Self {
            address: account.address.clone(),
            name: account.name.clone(),
        }
    }
}

pub struct SystemSigner {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    secret: Vec<u8>,
    fingerprint: String,
    identity: RwLock<Option<SystemIdentity>>,
}

impl SystemSigner {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        secret: &[u8],
    ) -> Result<Self, SignerError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(SignerError::InvalidKey("secret shorter than 16 bytes"));
        }
        let digest = Sha256::digest(secret);
        let mut fingerprint = hex::encode(digest);
        fingerprint.truncate(FINGERPRINT_HEX_LEN);

        Ok(Self {
            store,
            clock,
            secret: secret.to_vec(),
            fingerprint,
            identity: RwLock::new(None),
        })
    }

    /// Identifies the key without revealing it
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Create the system account if absent. Safe to call on every boot.
    pub async fn bootstrap(&self) -> Result<SystemIdentity, SignerError> {
        if let Some(existing) = self.store.system_account().await? {
            debug!(address = %existing.address, "System account already present");
            return Ok(SystemIdentity::from(&existing));
        }

        let account = Account {
            address: AccountAddress::generate(),
            name: SYSTEM_ACCOUNT_NAME.to_string(),
            kind: AccountKind::System,
            owners: vec![SYSTEM_OWNER_ID],
            quorum: 1,
            total_owners: 1,
            active: true,
            initial_deposit: Amount::ZERO,
            created_at: self.clock.now(),
        };

        match self.store.insert_account(&account).await {
            Ok(()) => {
                info!(address = %account.address, fingerprint = %self.fingerprint, "System account created");
                Ok(SystemIdentity::from(&account))
            }
            // Another process bootstrapped first
            Err(StoreError::Duplicate(c)) if c == SINGLE_SYSTEM_CONSTRAINT => self
                .store
                .system_account()
                .await?
                .map(|a| SystemIdentity::from(&a))
                .ok_or(SignerError::SystemUserMissing),
            Err(e) => Err(e.into()),
        }
    }

    /// Cached identity; read lock on the hot path, write lock only on a miss
    pub async fn resolve(&self) -> Result<SystemIdentity, SignerError> {
        if let Some(identity) = self.identity.read().await.as_ref() {
            return Ok(identity.clone());
        }

        let mut slot = self.identity.write().await;
        // Another task may have filled it while we waited
        if let Some(identity) = slot.as_ref() {
            return Ok(identity.clone());
        }

        let Some(account) = self.store.system_account().await? else {
            error!("System identity missing; refunds cannot be signed");
            return Err(SignerError::SystemUserMissing);
        };
        let identity = SystemIdentity::from(&account);
        debug!(address = %identity.address, "System identity cached");
        *slot = Some(identity.clone());
        Ok(identity)
    }

    /// HMAC-SHA256 over `payload`, plus the fingerprint of the key used
    pub fn sign(&self, payload: &[u8]) -> Result<(Vec<u8>, String), SignerError> {
        let mut mac = self.mac()?;
        mac.update(payload);
        Ok((mac.finalize().into_bytes().to_vec(), self.fingerprint.clone()))
    }

    /// Constant-time check of a MAC produced by [`SystemSigner::sign`]
    pub fn verify(&self, payload: &[u8], signature: &[u8], fingerprint: &str) -> bool {
        if fingerprint != self.fingerprint {
            return false;
        }
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(payload);
        mac.verify_slice(signature).is_ok()
    }

    /// Sign a compensating transfer that reverses `reverses`
    pub fn sign_reversal(
        &self,
        sender: &AccountAddress,
        receiver: &AccountAddress,
        amount: Amount,
        created_at: DateTime<Utc>,
        reverses: TransactionId,
    ) -> Result<(Vec<u8>, String), SignerError> {
        self.sign(&reversal_payload(sender, receiver, amount, created_at, reverses))
    }

    fn mac(&self) -> Result<HmacSha256, SignerError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| SignerError::InvalidKey("unusable HMAC key"))
    }
}
