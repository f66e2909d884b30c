//! Data models for accounts and their owners

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{AccountAddress, OwnerId};
use crate::money::Amount;

/// Account specialization
///
/// Stored as SMALLINT. Wallets, card-style accounts and cash pools share the
/// same ledger semantics; only cash pools carry an extra lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum AccountKind {
    Wallet = 1,
    Card = 2,
    CashPool = 3,
    /// Reserved role: the single system identity
    System = 9,
}

impl AccountKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(AccountKind::Wallet),
            2 => Some(AccountKind::Card),
            3 => Some(AccountKind::CashPool),
            9 => Some(AccountKind::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Wallet => "WALLET",
            AccountKind::Card => "CARD",
            AccountKind::CashPool => "CASH_POOL",
            AccountKind::System => "SYSTEM",
        }
    }
}

/// Fund-holding account.
///
/// Balance is never stored here; it is derived by the store as
/// `initial_deposit + Σ incoming − Σ outgoing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: AccountAddress,
    pub name: String,
    pub kind: AccountKind,
    pub owners: Vec<OwnerId>,
    /// Signatures required to authorize (stored, single-signer enforced)
    pub quorum: i16,
    /// Declared owner seats
    pub total_owners: i16,
    pub active: bool,
    pub initial_deposit: Amount,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn is_owned_by(&self, owner: OwnerId) -> bool {
        self.owners.contains(&owner)
    }

    pub fn is_frozen(&self) -> bool {
        !self.active
    }
}

/// Outcome of an owner-set mutation, decided inside the store transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerChange {
    Applied,
    /// Already in the requested state (idempotent)
    Unchanged,
    SeatsFull,
    LastOwner,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_kind_from_id() {
        assert_eq!(AccountKind::from_id(1), Some(AccountKind::Wallet));
        assert_eq!(AccountKind::from_id(3), Some(AccountKind::CashPool));
        assert_eq!(AccountKind::from_id(9), Some(AccountKind::System));
        assert_eq!(AccountKind::from_id(0), None);
        assert_eq!(AccountKind::from_id(4), None);
    }

    #[test]
    fn test_ownership_and_freeze_flags() {
        let account = Account {
            address: AccountAddress::generate(),
            name: "household".to_string(),
            kind: AccountKind::Wallet,
            owners: vec![7, 8],
            quorum: 1,
            total_owners: 2,
            active: false,
            initial_deposit: Amount::ZERO,
            created_at: Utc::now(),
        };

        assert!(account.is_owned_by(7));
        assert!(!account.is_owned_by(9));
        assert!(account.is_frozen());
    }
}
