//! Transfer Error Types
//!
//! Business rejections carry a specific reason for the caller. Ledger-side
//! constraint failures surface as [`TransferError::LedgerRejected`] whose
//! message stays generic; the precise reason is only logged.

use thiserror::Error;

use crate::core_types::{AccountAddress, OwnerId};
use crate::fee::FeeError;
use crate::limit::LimitError;
use crate::store::{Rejection, StoreError};
use crate::system::SignerError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Sender and receiver cannot be the same account")]
    SameAccount,

    // === Account Errors ===
    #[error("Account not found: {0}")]
    AccountNotFound(AccountAddress),

    #[error("Account is frozen: {0}")]
    AccountFrozen(AccountAddress),

    #[error("Owner {actor} does not own account {address}")]
    NotOwner {
        actor: OwnerId,
        address: AccountAddress,
    },

    // === Authorization Errors ===
    #[error("Signature does not verify")]
    InvalidSignature,

    #[error("Spending limit exceeded")]
    LimitExceeded,

    #[error("System identity unavailable")]
    SystemUserMissing,

    // === Ledger Errors ===
    /// `reason` is the store rejection code, kept for logs and tests
    #[error("Transfer rejected by ledger")]
    LedgerRejected { reason: &'static str },

    // === System Errors ===
    #[error("Deadline elapsed before the transfer completed")]
    Timeout,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::SameAccount => "SAME_ACCOUNT",
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::AccountFrozen(_) => "ACCOUNT_FROZEN",
            TransferError::NotOwner { .. } => "NOT_OWNER",
            TransferError::InvalidSignature => "INVALID_SIGNATURE",
            TransferError::LimitExceeded => "LIMIT_EXCEEDED",
            TransferError::SystemUserMissing => "SYSTEM_USER_MISSING",
            TransferError::LedgerRejected { .. } => "LEDGER_REJECTED",
            TransferError::Timeout => "TIMEOUT",
            TransferError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            TransferError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::InvalidAmount | TransferError::SameAccount => 400,
            TransferError::InvalidSignature => 401,
            TransferError::NotOwner { .. } => 403,
            TransferError::AccountNotFound(_) => 404,
            TransferError::LimitExceeded => 409,
            TransferError::AccountFrozen(_) => 422,
            TransferError::LedgerRejected { .. }
            | TransferError::SystemUserMissing
            | TransferError::Internal(_) => 500,
            TransferError::Unavailable(_) => 503,
            TransferError::Timeout => 504,
        }
    }

    /// Transient store failure; the caller may retry.
    ///
    /// A timeout is not retryable blindly: the commit may have landed, so the
    /// caller should consult the account history first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Unavailable(_))
    }

    /// Validation and business rejections, as opposed to system failures
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TransferError::InvalidAmount
                | TransferError::SameAccount
                | TransferError::AccountNotFound(_)
                | TransferError::AccountFrozen(_)
                | TransferError::NotOwner { .. }
                | TransferError::InvalidSignature
                | TransferError::LimitExceeded
        )
    }
}

impl From<Rejection> for TransferError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::AccountNotFound(a) => TransferError::AccountNotFound(a),
            Rejection::AccountFrozen(a) => TransferError::AccountFrozen(a),
            Rejection::LimitExceeded => TransferError::LimitExceeded,
            other => TransferError::LedgerRejected {
                reason: other.code(),
            },
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Rejected(r) => r.into(),
            StoreError::Unavailable(msg) => TransferError::Unavailable(msg),
            other => TransferError::Internal(other.to_string()),
        }
    }
}

impl From<LimitError> for TransferError {
    fn from(e: LimitError) -> Self {
        match e {
            LimitError::AccountNotFound(a) => TransferError::AccountNotFound(a),
            LimitError::NotOwner { actor, address } => TransferError::NotOwner { actor, address },
            LimitError::Store(s) => s.into(),
        }
    }
}

impl From<FeeError> for TransferError {
    fn from(e: FeeError) -> Self {
        match e {
            FeeError::Store(s) => s.into(),
            other => TransferError::Internal(other.to_string()),
        }
    }
}

impl From<SignerError> for TransferError {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::SystemUserMissing => TransferError::SystemUserMissing,
            SignerError::Store(s) => s.into(),
            other => TransferError::Internal(other.to_string()),
        }
    }
}
