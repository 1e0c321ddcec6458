//! Tamper-evident record fingerprints.
//!
//! A fingerprint is the SHA-256 digest of a record's canonical encoding with
//! the top-level `hash` field removed. It is computed once at issuance and
//! stored alongside the record; verification recomputes it and compares.
//! Because the creation timestamp is part of the encoding, two records with
//! the same clinical content but different creation instants have different
//! fingerprints.

use std::{fmt, str::FromStr};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    canonical,
    error::{RecordError, Result},
};

/// Name of the field that carries the stored fingerprint.
pub const HASH_FIELD: &str = "hash";

/// A 256-bit record fingerprint. Displays as 64 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Returns the raw digest.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the hex rendering stored in records.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| RecordError::Invalid(format!("fingerprint '{s}': {e}")))?;
        Ok(Self(bytes))
    }
}

/// A record that carries its own stored fingerprint.
pub trait IntegrityProtected: Serialize {
    /// Returns the fingerprint persisted at issuance, if any.
    fn stored_hash(&self) -> Option<&str>;
}

/// Returns the canonical bytes a fingerprint is computed over.
///
/// # Errors
///
/// Returns [`RecordError::Serialization`] if `record` does not serialize, or
/// [`RecordError::Invalid`] if it does not serialize to a JSON object.
pub fn canonical_form<T: Serialize + ?Sized>(record: &T) -> Result<String> {
    let mut value = serde_json::to_value(record)?;
    let map = value
        .as_object_mut()
        .ok_or_else(|| RecordError::Invalid("records must serialize to an object".into()))?;
    map.remove(HASH_FIELD);
    Ok(canonical::to_canonical_string(&value))
}

/// Computes the fingerprint of `record`, ignoring any stored hash.
///
/// # Errors
///
/// See [`canonical_form`].
pub fn fingerprint<T: Serialize + ?Sized>(record: &T) -> Result<Fingerprint> {
    let canonical = canonical_form(record)?;
    Ok(Fingerprint(Sha256::digest(canonical.as_bytes()).into()))
}

/// Recomputes `record`'s fingerprint and compares it with the stored one.
///
/// # Errors
///
/// - [`RecordError::MissingFingerprint`] if no hash is stored
/// - [`RecordError::IntegrityViolation`] if the stored hash differs from the
///   recomputed one in any character
pub fn verify<T: IntegrityProtected + ?Sized>(record: &T) -> Result<Fingerprint> {
    let stored = record.stored_hash().ok_or(RecordError::MissingFingerprint)?;
    let computed = fingerprint(record)?;
    if stored != computed.to_hex() {
        return Err(RecordError::IntegrityViolation {
            stored: stored.to_owned(),
            computed: computed.to_hex(),
        });
    }
    Ok(computed)
}
