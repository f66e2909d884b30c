//! Input validation for account creation
//!
//! Validated types keep their fields private so construction always goes
//! through `new()`.

use std::fmt;

/// Validation errors, raised before any store access
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid length for {field}: expected {min}-{max}, got {actual}")]
    InvalidLength {
        field: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Invalid quorum: need 1 <= quorum ({quorum}) <= total owners ({total_owners})")]
    InvalidQuorum { quorum: i16, total_owners: i16 },

    #[error("Invalid public key: expected a 32-byte Ed25519 key")]
    InvalidPublicKey,
}

const NAME_MAX_LEN: usize = 64;

/// Trimmed, non-empty account name (1-64 characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountName(String);

impl AccountName {
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        let name = name.trim();
        let len = name.chars().count();
        if len == 0 || len > NAME_MAX_LEN {
            return Err(ValidationError::InvalidLength {
                field: "name",
                min: 1,
                max: NAME_MAX_LEN,
                actual: len,
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owner seats and signature threshold: `1 <= quorum <= total_owners`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumPolicy {
    quorum: i16,
    total_owners: i16,
}

impl QuorumPolicy {
    pub fn new(quorum: i16, total_owners: i16) -> Result<Self, ValidationError> {
        if quorum < 1 || quorum > total_owners {
            return Err(ValidationError::InvalidQuorum {
                quorum,
                total_owners,
            });
        }
        Ok(Self {
            quorum,
            total_owners,
        })
    }

    pub fn single() -> Self {
        Self {
            quorum: 1,
            total_owners: 1,
        }
    }

    pub fn quorum(&self) -> i16 {
        self.quorum
    }

    pub fn total_owners(&self) -> i16 {
        self.total_owners
    }
}
