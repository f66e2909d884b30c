//! Transaction authorization
//!
//! [`TransactionAuthorizer`] decides whether a movement of money may be
//! committed and commits it atomically. Committed transactions are immutable;
//! there is no pending or retry state.

pub mod authorizer;
pub mod error;
pub mod notify;
pub mod types;

pub use authorizer::TransactionAuthorizer;
pub use error::TransferError;
pub use notify::{ChannelSink, LogSink, NotificationSink};
pub use types::{Authorization, FundRequest, Transaction, TransferEvent, TransferRequest};
