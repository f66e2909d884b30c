//! Transfer Core Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{AccountAddress, OwnerId, TransactionId};
use crate::money::Amount;

/// Committed ledger movement. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub sender: AccountAddress,
    pub receiver: AccountAddress,
    pub amount: Amount,
    /// Recorded, not deducted from `amount`
    pub fee: Amount,
    /// Caller-supplied, part of the signed payload
    pub created_at: DateTime<Utc>,
    pub signature: Vec<u8>,
    /// Set on system-signed compensating transactions
    pub signer_fingerprint: Option<String>,
    /// Original transaction this one reverses (refund marker)
    pub reverses: Option<TransactionId>,
    /// Server-side commit time, used for spending windows
    pub committed_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_compensating(&self) -> bool {
        self.reverses.is_some()
    }
}

/// How a transfer is authorized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Ed25519 signature by `actor`, who must own the sender account
    Owner { actor: OwnerId, signature: Vec<u8> },
    /// HMAC counter-signature by the system identity for a refund
    System {
        mac: Vec<u8>,
        key_fingerprint: String,
        reverses: TransactionId,
    },
}

/// Inbound transfer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub sender: AccountAddress,
    pub receiver: AccountAddress,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
    pub authorization: Authorization,
}

impl TransferRequest {
    pub fn signed_by_owner(
        actor: OwnerId,
        sender: AccountAddress,
        receiver: AccountAddress,
        amount: Amount,
        created_at: DateTime<Utc>,
        signature: Vec<u8>,
    ) -> Self {
        Self {
            sender,
            receiver,
            amount,
            created_at,
            authorization: Authorization::Owner { actor, signature },
        }
    }
}

/// Pending request for a counterparty to pay `requester`.
///
/// No funds move and nothing links it to a later transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundRequest {
    pub id: TransactionId,
    pub requester: AccountAddress,
    pub payer: AccountAddress,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
    pub signature: Vec<u8>,
}

/// Event handed to the notification sink after commit, keyed by receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub transaction_id: TransactionId,
    pub sender: AccountAddress,
    pub receiver: AccountAddress,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

impl TransferEvent {
    pub fn key(&self) -> &AccountAddress {
        &self.receiver
    }
}

impl From<&Transaction> for TransferEvent {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            sender: tx.sender.clone(),
            receiver: tx.receiver.clone(),
            amount: tx.amount,
            created_at: tx.created_at,
        }
    }
}
