//! Cash pool models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::core_types::{AccountAddress, TransactionId};
use crate::money::Amount;

/// Pool lifecycle
///
/// ```text
/// OPEN ──(collected ≥ target)──────────────▶ FUNDED
///   │
///   └──(now > expires_at, collected < target)─▶ REFUNDED
/// ```
///
/// FUNDED and REFUNDED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum PoolStatus {
    Open = 0,
    Funded = 10,
    Refunded = -10,
}

impl PoolStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PoolStatus::Open),
            10 => Some(PoolStatus::Funded),
            -10 => Some(PoolStatus::Refunded),
            _ => None,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PoolStatus::Funded | PoolStatus::Refunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Open => "OPEN",
            PoolStatus::Funded => "FUNDED",
            PoolStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Funding terms fixed at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTerms {
    pub description: String,
    pub target_amount: Amount,
    /// Designated payout receiver
    pub receiver: AccountAddress,
    pub expires_at: DateTime<Utc>,
}

/// Cash pool view: the underlying account, its terms, status and the
/// derived collected amount (Σ incoming transfers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashPool {
    pub account: Account,
    pub terms: PoolTerms,
    pub status: PoolStatus,
    pub collected: Amount,
    /// Contribution that completed the target, set with the FUNDED flip
    pub funded_by: Option<TransactionId>,
}

impl CashPool {
    pub fn address(&self) -> &AccountAddress {
        &self.account.address
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.terms.expires_at
    }

    pub fn remaining(&self) -> Amount {
        self.terms
            .target_amount
            .checked_sub(self.collected)
            .unwrap_or(Amount::ZERO)
    }
}
