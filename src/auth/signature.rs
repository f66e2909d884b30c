//! Ed25519 signature verification for transfer authorization.
//!
//! Only owner public keys are stored; private keys never reach the ledger.
//! Every malformed input (wrong key length, wrong signature length, key not
//! on the curve) verifies as `false` rather than erroring.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use super::payload::transfer_digest;
use crate::core_types::AccountAddress;
use crate::money::Amount;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Verify an Ed25519 signature over an arbitrary message.
pub fn verify_ed25519(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Some(verifying_key) = parse_public_key(public_key) else {
        return false;
    };

    let sig_bytes: [u8; SIGNATURE_LEN] = match signature.try_into() {
        Ok(b) => b,
        Err(_) => return false,
    };
    let sig = Signature::from_bytes(&sig_bytes);

    verifying_key.verify(message, &sig).is_ok()
}

/// Verify an owner's signature over the canonical transfer digest
pub fn verify_transfer(
    public_key: &[u8],
    sender: &AccountAddress,
    receiver: &AccountAddress,
    amount: Amount,
    created_at: DateTime<Utc>,
    signature: &[u8],
) -> bool {
    let digest = transfer_digest(sender, receiver, amount, created_at);
    verify_ed25519(public_key, &digest, signature)
}

/// True if the bytes decode to a usable Ed25519 verifying key
pub fn is_valid_public_key(public_key: &[u8]) -> bool {
    parse_public_key(public_key).is_some()
}

fn parse_public_key(public_key: &[u8]) -> Option<VerifyingKey> {
    let pk_bytes: [u8; PUBLIC_KEY_LEN] = public_key.try_into().ok()?;
    VerifyingKey::from_bytes(&pk_bytes).ok()
}

/// Generate a new Ed25519 keypair for testing.
///
/// Returns (private_key_bytes, public_key_bytes).
#[cfg(test)]
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    let signing_key = SigningKey::generate(&mut OsRng);
    (signing_key.to_bytes(), signing_key.verifying_key().to_bytes())
}

/// Sign a message with a private key (for testing).
#[cfg(test)]
pub fn sign_message(private_key: &[u8; 32], message: &[u8]) -> [u8; 64] {
    use ed25519_dalek::{Signer, SigningKey};

    SigningKey::from_bytes(private_key).sign(message).to_bytes()
}

/// Sign the canonical transfer digest (for testing).
#[cfg(test)]
pub fn sign_transfer(
    private_key: &[u8; 32],
    sender: &AccountAddress,
    receiver: &AccountAddress,
    amount: Amount,
    created_at: DateTime<Utc>,
) -> Vec<u8> {
    sign_message(private_key, &transfer_digest(sender, receiver, amount, created_at)).to_vec()
}
