//! Ledger addresses, transaction hashes and Keccak-256.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::{
    error::{LedgerError, Result},
    rlp,
};

/// Computes the Keccak-256 digest of `input`.
#[must_use]
pub fn keccak256(input: &[u8]) -> [u8; 32] {
    Keccak256::digest(input).into()
}

/// Decodes a hex string with an optional `0x` prefix.
pub(crate) fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|e| LedgerError::encoding(format!("invalid hex '{input}': {e}")))
}

/// A 20-byte ledger account address.
///
/// Parsing accepts any letter case with or without the `0x` prefix, so two
/// textual forms that differ only in case compare equal once parsed.
/// [`Display`](fmt::Display) renders lowercase; use
/// [`to_checksum`](Address::to_checksum) for the mixed-case EIP-55 form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Self = Self([0u8; 20]);

    /// Wraps raw address bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Returns the raw address bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Derives an address from an uncompressed SEC1 public key
    /// (`0x04 || x || y`, 65 bytes).
    pub fn from_uncompressed_public_key(point: &[u8]) -> Result<Self> {
        if point.len() != 65 || point[0] != 0x04 {
            return Err(LedgerError::encoding("expected a 65-byte uncompressed public key"));
        }
        let digest = keccak256(&point[1..]);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        Ok(Self(bytes))
    }

    /// Computes the address of a contract created by `sender` at `nonce`.
    #[must_use]
    pub fn contract_address(sender: &Address, nonce: u64) -> Self {
        let encoded = rlp::encode_list(&[rlp::encode_bytes(&sender.0), rlp::encode_uint(nonce)]);
        let digest = keccak256(&encoded);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        Self(bytes)
    }

    /// Renders the EIP-55 mixed-case checksum form.
    #[must_use]
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let digest = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (digest[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = decode_hex(s)?;
        let bytes: [u8; 20] = bytes.try_into().map_err(|raw: Vec<u8>| {
            LedgerError::encoding(format!("address must be 20 bytes, got {}", raw.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32-byte transaction hash, the identifier returned on submission.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash([u8; 32]);

impl TxHash {
    /// Wraps raw hash bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw hash bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

impl FromStr for TxHash {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = decode_hex(s)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|raw: Vec<u8>| {
            LedgerError::encoding(format!("transaction hash must be 32 bytes, got {}", raw.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn keccak_of_empty_input() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn parse_is_case_insensitive() {
        let lower: Address = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23".parse().unwrap();
        let mixed: Address = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23".parse().unwrap();
        let bare: Address = "2C7536E3605D9C16A7A3D7B1898E529396A65C23".parse().unwrap();
        assert_eq!(lower, mixed);
        assert_eq!(lower, bare);
    }

    #[test]
    fn checksum_rendering() {
        let addr: Address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap();
        assert_eq!(addr.to_checksum(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    }

    #[test]
    fn display_is_lowercase_prefixed() {
        let addr: Address = "0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED".parse().unwrap();
        assert_eq!(addr.to_string(), "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed");
    }

    #[test]
    fn rejects_wrong_length_and_bad_hex() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzz7536e3605d9c16a7a3d7b1898e529396a65c23".parse::<Address>().is_err());
    }

    #[test]
    fn contract_address_derivation() {
        let sender: Address = "0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0".parse().unwrap();
        assert_eq!(
            Address::contract_address(&sender, 0).to_string(),
            "0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d"
        );
        assert_eq!(
            Address::contract_address(&sender, 1).to_string(),
            "0x343c43a37d37dff08ae8c4a11544c718abb4fcf8"
        );
    }

    #[test]
    fn serde_uses_text_form() {
        let addr: Address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    proptest! {
        /// Any casing of the hex digits parses to the same address.
        #[test]
        fn casing_never_changes_identity(bytes in proptest::array::uniform20(any::<u8>()), upper in any::<bool>()) {
            let addr = Address::new(bytes);
            let text = if upper { addr.to_string().to_uppercase().replacen("0X", "0x", 1) } else { addr.to_checksum() };
            prop_assert_eq!(text.parse::<Address>().unwrap(), addr);
        }
    }
}
