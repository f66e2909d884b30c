//! Canonical transfer payload.
//!
//! The signed message is the SHA-256 digest of a compact JSON object with
//! keys in fixed order:
//!
//! ```text
//! {"sender":"acct_..","receiver":"acct_..","amount":"30","created_at":"2024-01-01T00:00:00Z"}
//! ```
//!
//! `amount` is the normalized decimal string (no trailing zeros) and
//! `created_at` is RFC3339 in UTC with `Z` and only as many sub-second digits
//! as needed, so equal values always encode to equal bytes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core_types::{AccountAddress, TransactionId};
use crate::money::Amount;

#[derive(Serialize)]
struct CanonicalTransfer<'a> {
    sender: &'a str,
    receiver: &'a str,
    amount: String,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reverses: Option<String>,
}

/// Timestamp encoding used in signed payloads
pub fn canonical_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn canonical_payload(
    sender: &AccountAddress,
    receiver: &AccountAddress,
    amount: Amount,
    created_at: DateTime<Utc>,
) -> Vec<u8> {
    let body = CanonicalTransfer {
        sender: sender.as_str(),
        receiver: receiver.as_str(),
        amount: amount.canonical(),
        created_at: canonical_timestamp(created_at),
        reverses: None,
    };
    encode(&body)
}

/// Payload the system identity MACs for a compensating transfer: the
/// transfer fields plus the id of the transaction being reversed
pub fn reversal_payload(
    sender: &AccountAddress,
    receiver: &AccountAddress,
    amount: Amount,
    created_at: DateTime<Utc>,
    reverses: TransactionId,
) -> Vec<u8> {
    let body = CanonicalTransfer {
        sender: sender.as_str(),
        receiver: receiver.as_str(),
        amount: amount.canonical(),
        created_at: canonical_timestamp(created_at),
        reverses: Some(reverses.to_string()),
    };
    encode(&body)
}

fn encode(body: &CanonicalTransfer<'_>) -> Vec<u8> {
    // A struct of plain strings always serializes
    serde_json::to_vec(body).unwrap_or_default()
}

/// SHA-256 over [`canonical_payload`]; this is the message that gets signed
pub fn transfer_digest(
    sender: &AccountAddress,
    receiver: &AccountAddress,
    amount: Amount,
    created_at: DateTime<Utc>,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(canonical_payload(sender, receiver, amount, created_at));
    hasher.finalize().into()
}
