//! Spending Limit Error Types

use thiserror::Error;

use crate::core_types::{AccountAddress, OwnerId};
use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimitError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountAddress),

    #[error("Owner {actor} does not own account {address}")]
    NotOwner {
        actor: OwnerId,
        address: AccountAddress,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LimitError {
    pub fn code(&self) -> &'static str {
        match self {
            LimitError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LimitError::NotOwner { .. } => "NOT_OWNER",
            LimitError::Store(StoreError::Unavailable(_)) => "SERVICE_UNAVAILABLE",
            LimitError::Store(_) => "DATABASE_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LimitError::Store(e) if e.is_retryable())
    }
}
