//! Cash pools
//!
//! Crowd-funding accounts with a target, a payout receiver and an expiry.
//! Funded pools pay out to the receiver; expired pools that missed their
//! target refund every contributor.

pub mod engine;
pub mod error;
pub mod models;
pub mod sweeper;

pub use engine::{CashPoolEngine, Deposit, RefundReport, SweepReport};
pub use error::PoolError;
pub use models::{CashPool, PoolStatus, PoolTerms};
pub use sweeper::{PoolSweeper, SweeperConfig};
