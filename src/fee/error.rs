//! Fee Error Types

use thiserror::Error;

use crate::money::Amount;
use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("No fee tier covers amount {0}")]
    NotFound(Amount),

    #[error("Invalid fee tier: {0}")]
    InvalidTier(&'static str),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl FeeError {
    pub fn code(&self) -> &'static str {
        match self {
            FeeError::NotFound(_) => "FEE_TIER_NOT_FOUND",
            FeeError::InvalidTier(_) => "INVALID_FEE_TIER",
            FeeError::Store(StoreError::Unavailable(_)) => "SERVICE_UNAVAILABLE",
            FeeError::Store(_) => "DATABASE_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FeeError::Store(e) if e.is_retryable())
    }
}
