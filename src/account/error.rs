//! Account Error Types

use thiserror::Error;

use super::validation::ValidationError;
use crate::core_types::{AccountAddress, OwnerId};
use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Account not found: {0}")]
    NotFound(AccountAddress),

    #[error("Owner {actor} does not own account {address}")]
    NotOwner {
        actor: OwnerId,
        address: AccountAddress,
    },

    #[error("All owner seats of {0} are taken")]
    OwnerLimitReached(AccountAddress),

    #[error("Cannot remove the last owner of {0}")]
    LastOwner(AccountAddress),

    #[error("No unique address after {0} attempts")]
    AddressExhausted(u32),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl AccountError {
    pub fn code(&self) -> &'static str {
        match self {
            AccountError::Validation(_) => "VALIDATION_ERROR",
            AccountError::NotFound(_) => "ACCOUNT_NOT_FOUND",
            AccountError::NotOwner { .. } => "NOT_OWNER",
            AccountError::OwnerLimitReached(_) => "OWNER_LIMIT_REACHED",
            AccountError::LastOwner(_) => "LAST_OWNER",
            AccountError::AddressExhausted(_) => "ADDRESS_EXHAUSTED",
            AccountError::Store(StoreError::Unavailable(_)) => "SERVICE_UNAVAILABLE",
            AccountError::Store(_) => "DATABASE_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AccountError::Store(e) if e.is_retryable())
    }
}
