//! Cash Pool Error Types

use thiserror::Error;

use super::models::PoolStatus;
use crate::account::ValidationError;
use crate::core_types::AccountAddress;
use crate::store::StoreError;
use crate::transfer::TransferError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    // === Validation Errors ===
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Target amount must be greater than zero")]
    InvalidTarget,

    #[error("Expiry must be in the future")]
    ExpiryInPast,

    // === Lookup Errors ===
    #[error("Cash pool not found: {0}")]
    NotFound(AccountAddress),

    #[error("Payout receiver not found: {0}")]
    ReceiverNotFound(AccountAddress),

    #[error("No unique address after {0} attempts")]
    AddressExhausted(u32),

    // === State Errors ===
    #[error("Cash pool {0} is not accepting deposits")]
    Closed(AccountAddress),

    #[error("Deposit would exceed the target of cash pool {0}")]
    TargetExceeded(AccountAddress),

    #[error("Cash pool {address} is {status}")]
    InvalidState {
        address: AccountAddress,
        status: PoolStatus,
    },

    #[error("Cash pool {0} has not expired")]
    NotExpired(AccountAddress),

    #[error("Refund of {pool} incomplete: {issued} issued, {failed} failed")]
    RefundIncomplete {
        pool: AccountAddress,
        issued: usize,
        failed: usize,
    },

    // === Downstream ===
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PoolError {
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::Validation(_) => "VALIDATION_ERROR",
            PoolError::InvalidTarget => "INVALID_TARGET",
            PoolError::ExpiryInPast => "EXPIRY_IN_PAST",
            PoolError::NotFound(_) => "POOL_NOT_FOUND",
            PoolError::ReceiverNotFound(_) => "RECEIVER_NOT_FOUND",
            PoolError::AddressExhausted(_) => "ADDRESS_EXHAUSTED",
            PoolError::Closed(_) => "POOL_CLOSED",
            PoolError::TargetExceeded(_) => "POOL_TARGET_EXCEEDED",
            PoolError::InvalidState { .. } => "INVALID_POOL_STATE",
            PoolError::NotExpired(_) => "POOL_NOT_EXPIRED",
            PoolError::RefundIncomplete { .. } => "REFUND_INCOMPLETE",
            PoolError::Transfer(e) => e.code(),
            PoolError::Store(StoreError::Unavailable(_)) => "SERVICE_UNAVAILABLE",
            PoolError::Store(_) => "DATABASE_ERROR",
        }
    }

    /// Incomplete refunds are retried by the next sweep
    pub fn is_retryable(&self) -> bool {
        match self {
            PoolError::RefundIncomplete { .. } => true,
            PoolError::Transfer(e) => e.is_retryable(),
            PoolError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}
