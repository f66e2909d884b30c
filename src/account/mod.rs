//! Account registry
//!
//! Wallets, card-style accounts and cash pools are all accounts: an address,
//! an owner set, a quorum, and an active/frozen flag.

pub mod error;
pub mod models;
pub mod registry;
pub mod validation;

pub use error::AccountError;
pub use models::{Account, AccountKind, OwnerChange};
pub use registry::AccountRegistry;
pub use validation::{AccountName, QuorumPolicy, ValidationError};
