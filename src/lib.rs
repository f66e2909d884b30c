//! pool_ledger - Transaction Authorization & Ledger Consistency
//!
//! Authorizes value transfers between accounts, enforces per-period
//! spending caps, prices transfers from a tiered fee schedule and runs
//! goal-funded cash pools that pay out on success and refund on expiry.
//!
//! # Modules
//!
//! - [`core_types`] - Addresses, transaction ids, clock
//! - [`money`] - Exact decimal amounts
//! - [`db`] - PostgreSQL connection and schema
//! - [`store`] - Durable store traits, Postgres and in-memory implementations
//! - [`account`] - AccountRegistry (owners, freeze, identity keys)
//! - [`fee`] - FeeSchedule (cached tier lookup)
//! - [`limit`] - SpendingLimitGuard (per-period caps)
//! - [`auth`] - Canonical payload and Ed25519 verification
//! - [`system`] - SystemSigner (system identity, HMAC counter-signature)
//! - [`transfer`] - TransactionAuthorizer (the authorize-and-commit pipeline)
//! - [`cashpool`] - CashPoolEngine and the expiry sweeper

// Core types - must be first!
pub mod core_types;
pub mod money;

// Persistence
pub mod db;
pub mod store;

// Components
pub mod account;
pub mod auth;
pub mod cashpool;
pub mod fee;
pub mod limit;
pub mod system;
pub mod transfer;

// Service plumbing
pub mod config;
pub mod logging;

// Convenient re-exports at crate root
pub use account::{Account, AccountError, AccountKind, AccountRegistry};
pub use cashpool::{CashPool, CashPoolEngine, PoolError, PoolStatus, PoolSweeper};
pub use core_types::{AccountAddress, Clock, ManualClock, OwnerId, SystemClock, TransactionId};
pub use fee::{FeeError, FeeSchedule, FeeTier};
pub use limit::{LimitError, Period, SpendingLimit, SpendingLimitGuard};
pub use money::Amount;
pub use store::{MemoryStore, PgStore, Store, StoreError};
pub use system::{SignerError, SystemSigner};
pub use transfer::{
    Authorization, FundRequest, NotificationSink, Transaction, TransactionAuthorizer,
    TransferError, TransferRequest,
};
