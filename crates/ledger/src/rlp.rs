//! Recursive-length-prefix encoding for transaction payloads.
//!
//! Only encoding is needed: the gateway builds and signs transactions but
//! never parses ones produced elsewhere.

/// Encodes a byte string.
pub(crate) fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        return bytes.to_vec();
    }
    let mut out = encode_length(bytes.len(), 0x80);
    out.extend_from_slice(bytes);
    out
}

/// Encodes an unsigned integer as its minimal big-endian byte string.
pub(crate) fn encode_uint(value: impl Into<u128>) -> Vec<u8> {
    let value: u128 = value.into();
    let be = value.to_be_bytes();
    let first = be.iter().position(|b| *b != 0).unwrap_or(be.len());
    encode_bytes(&be[first..])
}

/// Encodes a 32-byte big-endian scalar with leading zeros stripped.
pub(crate) fn encode_scalar(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    encode_bytes(&bytes[first..])
}

/// Encodes a list of already-encoded items.
pub(crate) fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(Vec::len).sum();
    let mut out = encode_length(payload_len, 0xc0);
    out.reserve(payload_len);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

fn encode_length(len: usize, offset: u8) -> Vec<u8> {
    if len <= 55 {
        return vec![offset + len as u8];
    }
    let be = len.to_be_bytes();
    let first = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
    let len_bytes = &be[first..];
    let mut out = Vec::with_capacity(1 + len_bytes.len());
    out.push(offset + 55 + len_bytes.len() as u8);
    out.extend_from_slice(len_bytes);
    out
}
