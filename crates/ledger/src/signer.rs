//! secp256k1 signing identity and signature recovery.
//!
//! [`AdminSigner`] owns the gateway's private key and signs transaction
//! digests. [`RecoverableSignature`] is the 65-byte `r || s || v` form used
//! both for transactions and for personal-message signatures, and
//! [`recover_personal_signer`] implements the EIP-191 recovery used by wallet
//! linking.

use std::fmt;

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use zeroize::Zeroizing;

use crate::{
    address::{Address, decode_hex, keccak256},
    error::{LedgerError, Result},
};

/// Prefix mandated by EIP-191 version `0x45` (personal messages).
const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Hashes a personal message the way wallets do before signing it.
#[must_use]
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut payload = Vec::with_capacity(PERSONAL_MESSAGE_PREFIX.len() + 20 + message.len());
    payload.extend_from_slice(PERSONAL_MESSAGE_PREFIX.as_bytes());
    payload.extend_from_slice(message.len().to_string().as_bytes());
    payload.extend_from_slice(message.as_bytes());
    keccak256(&payload)
}

/// Recovers the address that signed `message` under EIP-191.
pub fn recover_personal_signer(message: &str, signature: &RecoverableSignature) -> Result<Address> {
    signature.recover_prehash(&personal_message_hash(message))
}

/// A secp256k1 signature with its recovery id.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    r: [u8; 32],
    s: [u8; 32],
    recovery_id: u8,
}

impl RecoverableSignature {
    /// Parses the 65-byte `r || s || v` form. `v` may be `0`/`1` or `27`/`28`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(LedgerError::Signing(format!(
                "signature must be 65 bytes, got {}",
                bytes.len()
            )));
        }
        let recovery_id = match bytes[64] {
            v @ (0 | 1) => v,
            v @ (27 | 28) => v - 27,
            other => return Err(LedgerError::Signing(format!("unsupported recovery byte {other}"))),
        };
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, recovery_id })
    }

    /// Parses a hex-encoded signature, with or without `0x`.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = decode_hex(hex).map_err(|e| LedgerError::Signing(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Returns the `r` scalar.
    #[must_use]
    pub fn r(&self) -> &[u8; 32] {
        &self.r
    }

    /// Returns the `s` scalar.
    #[must_use]
    pub fn s(&self) -> &[u8; 32] {
        &self.s
    }

    /// Returns the recovery id (`0` or `1`).
    #[must_use]
    pub fn recovery_id(&self) -> u8 {
        self.recovery_id
    }

    /// Returns `r || s || v` with `v` in the `27`/`28` convention.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.recovery_id + 27;
        out
    }

    /// Returns the `0x`-prefixed hex form of [`to_bytes`](Self::to_bytes).
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// Recovers the signer address from a 32-byte prehash.
    pub fn recover_prehash(&self, prehash: &[u8; 32]) -> Result<Address> {
        let mut scalars = [0u8; 64];
        scalars[..32].copy_from_slice(&self.r);
        scalars[32..].copy_from_slice(&self.s);
        let mut signature = Signature::from_slice(&scalars)
            .map_err(|e| LedgerError::Signing(format!("malformed signature: {e}")))?;
        let mut recovery_id = RecoveryId::from_byte(self.recovery_id)
            .ok_or_else(|| LedgerError::Signing("invalid recovery id".into()))?;

        // High-s signatures are valid on the curve; flip to the low-s twin.
        if let Some(normalized) = signature.normalize_s() {
            signature = normalized;
            recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
        }

        let key = VerifyingKey::recover_from_prehash(prehash, &signature, recovery_id)
            .map_err(|e| LedgerError::Signing(format!("recovery failed: {e}")))?;
        address_of(&key)
    }
}

impl fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecoverableSignature({})", self.to_hex())
    }
}

fn address_of(key: &VerifyingKey) -> Result<Address> {
    Address::from_uncompressed_public_key(key.to_encoded_point(false).as_bytes())
}

/// The gateway's admin signing identity.
///
/// The private key never leaves this type; `Debug` prints only the address.
pub struct AdminSigner {
    key: SigningKey,
    address: Address,
}

impl AdminSigner {
    /// Loads a signer from a hex-encoded 32-byte private key.
    pub fn from_hex(secret: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            decode_hex(secret).map_err(|_| LedgerError::Signing("private key is not hex".into()))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Loads a signer from raw private key bytes.
    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        let key = SigningKey::from_slice(secret)
            .map_err(|_| LedgerError::Signing("invalid secp256k1 private key".into()))?;
        let address = address_of(key.verifying_key())?;
        Ok(Self { key, address })
    }

    /// Generates a fresh random signer.
    #[must_use]
    pub fn random() -> Self {
        loop {
            let secret = Zeroizing::new(rand::random::<[u8; 32]>());
            // Out-of-range scalars are astronomically rare; draw again.
            if let Ok(signer) = Self::from_bytes(secret.as_slice()) {
                return signer;
            }
        }
    }

    /// Returns the signer's ledger address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs a 32-byte digest.
    pub fn sign_prehash(&self, prehash: &[u8; 32]) -> Result<RecoverableSignature> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(prehash)
            .map_err(|e| LedgerError::Signing(e.to_string()))?;
        let bytes = signature.to_bytes();
        let mut r_bytes = [0u8; 32];
        let mut s_bytes = [0u8; 32];
        r_bytes.copy_from_slice(&bytes[..32]);
        s_bytes.copy_from_slice(&bytes[32..]);
        Ok(RecoverableSignature { r: r_bytes, s: s_bytes, recovery_id: recovery_id.to_byte() })
    }

    /// Signs `message` as an EIP-191 personal message.
    pub fn sign_personal_message(&self, message: &str) -> Result<RecoverableSignature> {
        self.sign_prehash(&personal_message_hash(message))
    }
}

impl fmt::Debug for AdminSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminSigner").field("address", &self.address).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const KNOWN_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn derives_known_address() {
        let signer = AdminSigner::from_hex(KNOWN_KEY).unwrap();
        assert_eq!(signer.address().to_checksum(), "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23");
    }

    #[test]
    fn personal_signature_round_trip() {
        let signer = AdminSigner::random();
        let signature = signer.sign_personal_message("Connect to E-Health: U123").unwrap();
        let recovered = recover_personal_signer("Connect to E-Health: U123", &signature).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn different_message_recovers_different_address() {
        let signer = AdminSigner::random();
        let signature = signer.sign_personal_message("Connect to E-Health: U123").unwrap();
        let recovered = recover_personal_signer("Connect to E-Health: U999", &signature).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn hex_form_accepts_both_recovery_conventions() {
        let signer = AdminSigner::random();
        let signature = signer.sign_personal_message("hello").unwrap();

        let mut raw = signature.to_bytes();
        assert!(raw[64] == 27 || raw[64] == 28);
        let parsed = RecoverableSignature::from_hex(&signature.to_hex()).unwrap();
        assert_eq!(parsed, signature);

        raw[64] -= 27;
        assert_eq!(RecoverableSignature::from_bytes(&raw).unwrap(), signature);
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        assert!(RecoverableSignature::from_bytes(&[0u8; 64]).is_err());
        let mut raw = [1u8; 65];
        raw[64] = 5;
        assert!(RecoverableSignature::from_bytes(&raw).is_err());
        assert!(RecoverableSignature::from_hex("0xnothex").is_err());
    }

    #[test]
    fn zero_scalar_signature_fails_recovery() {
        let sig = RecoverableSignature::from_bytes(&[0u8; 65]).unwrap();
        assert!(sig.recover_prehash(&[7u8; 32]).is_err());
    }

    #[test]
    fn invalid_private_keys_are_rejected() {
        assert!(AdminSigner::from_hex("0x00").is_err());
        assert!(AdminSigner::from_bytes(&[0u8; 32]).is_err());
        assert!(AdminSigner::from_hex("not-a-key").is_err());
    }

    #[test]
    fn debug_does_not_leak_key() {
        let signer = AdminSigner::from_hex(KNOWN_KEY).unwrap();
        let rendered = format!("{signer:?}");
        assert!(!rendered.contains("4c0883a6"));
        assert!(rendered.contains("AdminSigner"));
    }
}
