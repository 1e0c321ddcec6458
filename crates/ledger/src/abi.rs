//! Contract ABI encoding for the consent contract.
//!
//! The gateway only ever calls two functions, so instead of a general ABI
//! codec this module encodes exactly the argument shapes they use
//! (`address`, `address`, `string`) and decodes a single `bool` return.

use crate::{
    address::{Address, keccak256},
    error::{LedgerError, Result},
};

/// Canonical signature of the read-only consent check.
pub const CHECK_ACCESS_SIGNATURE: &str = "checkAccess(address,address)";

/// Canonical signature of the audit-append function.
pub const LOG_DATA_ACCESS_SIGNATURE: &str = "logDataAccess(address,address,string)";

const WORD: usize = 32;

/// Returns the 4-byte function selector for a canonical signature.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn uint_word(value: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

/// Encodes calldata for `checkAccess(patient, doctor)`.
#[must_use]
pub fn encode_check_access(patient: &Address, doctor: &Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 2 * WORD);
    data.extend_from_slice(&selector(CHECK_ACCESS_SIGNATURE));
    data.extend_from_slice(&address_word(patient));
    data.extend_from_slice(&address_word(doctor));
    data
}

/// Encodes calldata for `logDataAccess(patient, doctor, resource_id)`.
#[must_use]
pub fn encode_log_data_access(patient: &Address, doctor: &Address, resource_id: &str) -> Vec<u8> {
    let text = resource_id.as_bytes();
    let padded_len = text.len().div_ceil(WORD) * WORD;

    let mut data = Vec::with_capacity(4 + 4 * WORD + padded_len);
    data.extend_from_slice(&selector(LOG_DATA_ACCESS_SIGNATURE));
    data.extend_from_slice(&address_word(patient));
    data.extend_from_slice(&address_word(doctor));
    // Head of the dynamic argument: offset past the three head words.
    data.extend_from_slice(&uint_word(3 * WORD));
    data.extend_from_slice(&uint_word(text.len()));
    data.extend_from_slice(text);
    data.resize(data.len() + (padded_len - text.len()), 0);
    data
}

/// Decodes the `(address, address)` arguments of a `checkAccess` call.
///
/// Used by ledger doubles that need to interpret calldata.
pub fn decode_address_pair(calldata: &[u8]) -> Result<(Address, Address)> {
    if calldata.len() < 4 + 2 * WORD {
        return Err(LedgerError::encoding("calldata too short for two address arguments"));
    }
    let read = |offset: usize| {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&calldata[offset + 12..offset + WORD]);
        Address::new(bytes)
    };
    Ok((read(4), read(4 + WORD)))
}

/// Decodes the arguments of a `logDataAccess` call.
///
/// Used by ledger doubles to expose the audit trail they received.
pub fn decode_log_data_access(calldata: &[u8]) -> Result<(Address, Address, String)> {
    let (patient, doctor) = decode_address_pair(calldata)?;
    let read_usize = |offset: usize| -> Result<usize> {
        let word = calldata
            .get(offset..offset.saturating_add(WORD))
            .ok_or_else(|| LedgerError::encoding("calldata truncated"))?;
        if word[..WORD - 8].iter().any(|b| *b != 0) {
            return Err(LedgerError::encoding("length word out of range"));
        }
        let mut be = [0u8; 8];
        be.copy_from_slice(&word[WORD - 8..]);
        usize::try_from(u64::from_be_bytes(be))
            .map_err(|_| LedgerError::encoding("length word out of range"))
    };

    let offset = read_usize(4 + 2 * WORD)?.saturating_add(4);
    let len = read_usize(offset)?;
    let start = offset.saturating_add(WORD);
    let text = calldata
        .get(start..start.saturating_add(len))
        .ok_or_else(|| LedgerError::encoding("string argument truncated"))?;
    let resource = String::from_utf8(text.to_vec())
        .map_err(|e| LedgerError::encoding(format!("resource id is not UTF-8: {e}")))?;
    Ok((patient, doctor, resource))
}

/// Decodes a single ABI `bool` return value.
///
/// Anything other than a canonical 32-byte `0` or `1` word is rejected, so a
/// malformed response can never be read as a grant.
pub fn decode_bool(output: &[u8]) -> Result<bool> {
    if output.len() < WORD {
        return Err(LedgerError::encoding(format!(
            "bool return must be {WORD} bytes, got {}",
            output.len()
        )));
    }
    let word = &output[..WORD];
    if word[..WORD - 1].iter().any(|b| *b != 0) {
        return Err(LedgerError::encoding("bool return has non-zero high bytes"));
    }
    match word[WORD - 1] {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(LedgerError::encoding(format!("invalid bool value {other}"))),
    }
}

/// Encodes a `bool` as a return word.
#[must_use]
pub fn encode_bool(value: bool) -> Vec<u8> {
    let mut word = vec![0u8; WORD];
    word[WORD - 1] = u8::from(value);
    word
}
