//! Transfer authorization primitives
//!
//! - [`payload`] - canonical `{sender, receiver, amount, created_at}` encoding and digest
//! - [`signature`] - Ed25519 verification against an owner's registered key

pub mod payload;
pub mod signature;

pub use payload::{canonical_payload, reversal_payload, transfer_digest};
pub use signature::verify_ed25519;
