//! Money Module
//!
//! Fixed-point amounts for every balance, limit and fee comparison.
//! Binary floating point never touches money in this crate.
//!
//! ## Design Principles
//! 1. `Amount` wraps `rust_decimal::Decimal`, comparisons are exact
//! 2. Explicit Error Handling: No silent truncation
//! 3. A single canonical string form (normalized, no trailing zeros) is used
//!    wherever an amount is signed or hashed
//!
//! ## Usage
//! ```rust
//! use pool_ledger::money::Amount;
//!
//! let a = Amount::parse("30.50").unwrap();
//! assert_eq!(a.canonical(), "30.5");
//! ```

use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum fractional digits accepted for any amount
pub const MAX_SCALE: u32 = 8;

/// Money errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Non-negative fixed-point amount.
///
/// Zero is representable (balances, spent totals, fees); transfer amounts
/// are additionally checked with [`Amount::ensure_positive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Wrap a decimal, rejecting negatives and excess precision
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::InvalidAmount);
        }
        let normalized = value.normalize();
        if normalized.scale() > MAX_SCALE {
            return Err(MoneyError::PrecisionOverflow {
                provided: normalized.scale(),
                max: MAX_SCALE,
            });
        }
        Ok(Self(normalized))
    }

    /// Strict client-string parsing.
    ///
    /// Rejects signs, `.5`, `5.`, exponents and more than [`MAX_SCALE`]
    /// fractional digits.
    pub fn parse(s: &str) -> Result<Self, MoneyError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MoneyError::InvalidFormat("empty string".into()));
        }
        if s.starts_with('-') || s.starts_with('+') {
            return Err(MoneyError::InvalidAmount);
        }

        let parts: Vec<&str> = s.split('.').collect();
        match parts.len() {
            1 => {}
            2 => {
                if parts[0].is_empty() {
                    return Err(MoneyError::InvalidFormat(
                        "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                    ));
                }
                if parts[1].is_empty() {
                    return Err(MoneyError::InvalidFormat(
                        "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                    ));
                }
            }
            _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
        }
        if !parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())) {
            return Err(MoneyError::InvalidFormat(format!("invalid character in '{}'", s)));
        }

        let value = Decimal::from_str(s).map_err(|_| MoneyError::Overflow)?;
        Self::new(value)
    }

    /// Integer units, mostly for tests and fixtures
    pub fn from_units(units: u64) -> Self {
        Self(Decimal::from(units))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Transfer amounts must be strictly positive
    pub fn ensure_positive(&self) -> Result<(), MoneyError> {
        if self.0 > Decimal::ZERO {
            Ok(())
        } else {
            Err(MoneyError::InvalidAmount)
        }
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(|v| Amount(v.normalize()))
            .ok_or(MoneyError::Overflow)
    }

    /// Subtraction that refuses to go below zero
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        let v = self.0.checked_sub(other.0)?;
        if v.is_sign_negative() && !v.is_zero() {
            None
        } else {
            Some(Amount(v.normalize()))
        }
    }

    /// Canonical text used in signed payloads: normalized, no exponent
    pub fn canonical(&self) -> String {
        self.0.normalize().to_string()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for Amount {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(a: Amount) -> Self {
        a.0
    }
}

impl Sum for Amount {
    /// Saturates at `Decimal::MAX`; ledger totals never get close
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        Amount(
            iter.fold(Decimal::ZERO, |acc, a| acc.saturating_add(a.0))
                .normalize(),
        )
    }
}
