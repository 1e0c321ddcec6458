//! The signature challenge a wallet signs to prove ownership.

use ehealth_ledger::{Address, RecoverableSignature, recover_personal_signer};

use crate::{
    binding::UserId,
    error::{Result, WalletError},
};

/// Fixed prefix of every challenge.
pub const CHALLENGE_PREFIX: &str = "Connect to E-Health: ";

/// Returns the message `user_id` must sign: `"Connect to E-Health: {user_id}"`.
#[must_use]
pub fn challenge_message(user_id: &UserId) -> String {
    format!("{CHALLENGE_PREFIX}{user_id}")
}

/// Recovers the address that signed `user_id`'s challenge under EIP-191.
///
/// # Errors
///
/// Returns [`WalletError::InvalidSignature`] if `signature_hex` is not a
/// recoverable 65-byte signature.
pub fn recover_challenge_signer(user_id: &UserId, signature_hex: &str) -> Result<Address> {
    let signature = RecoverableSignature::from_hex(signature_hex)
        .map_err(|e| WalletError::InvalidSignature(e.to_string()))?;
    recover_personal_signer(&challenge_message(user_id), &signature)
        .map_err(|e| WalletError::InvalidSignature(e.to_string()))
}
