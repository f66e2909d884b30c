//! Core types used throughout the ledger
//!
//! Identifiers and the clock seam shared by every component.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Owner identity - the authenticated user acting on an account.
///
/// Resolved by the request-routing layer before any core call.
pub type OwnerId = i64;

/// Address prefix for every account (wallets, card accounts, cash pools)
pub const ADDRESS_PREFIX: &str = "acct_";

/// Random bytes behind an address (128 bits)
const ADDRESS_ENTROPY_BYTES: usize = 16;

/// Opaque, globally unique account address.
///
/// Format: `acct_` followed by 32 lowercase hex characters.
/// Fields are private to force validation through `parse()` / `generate()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountAddress(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid account address: '{0}'")]
pub struct AddressError(pub String);

impl AccountAddress {
    /// Generate a fresh random address.
    ///
    /// Uniqueness is enforced by the store; callers retry on collision.
    pub fn generate() -> Self {
        let mut bytes = [0u8; ADDRESS_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(format!("{}{}", ADDRESS_PREFIX, hex::encode(bytes)))
    }

    /// Parse and validate an address string
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let body = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or_else(|| AddressError(s.to_string()))?;

        let valid = body.len() == ADDRESS_ENTROPY_BYTES * 2
            && body
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !valid {
            return Err(AddressError(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountAddress> for String {
    fn from(addr: AccountAddress) -> Self {
        addr.0
    }
}

/// Transaction ID - ULID-based, sortable by creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Wall clock seam (UTC)
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generated_address_is_valid() {
        let addr = AccountAddress::generate();
        assert!(addr.as_str().starts_with(ADDRESS_PREFIX));
        assert_eq!(AccountAddress::parse(addr.as_str()).unwrap(), addr);
    }

    #[test]
    fn test_generated_addresses_differ() {
        let a = AccountAddress::generate();
        let b = AccountAddress::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(AccountAddress::parse("").is_err());
        assert!(AccountAddress::parse("acct_").is_err());
        assert!(AccountAddress::parse("wallet_0123456789abcdef0123456789abcdef").is_err());
        // Uppercase hex is not canonical
        assert!(AccountAddress::parse("acct_0123456789ABCDEF0123456789abcdef").is_err());
        assert!(AccountAddress::parse("acct_0123").is_err());
    }

    #[test]
    fn test_transaction_id_string_roundtrip() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_manual_clock() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(chrono::Duration::hours(2));
        assert_eq!(clock.now(), start + chrono::Duration::hours(2));

        let later = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }
}
