//! Error types for wallet linking.

use ehealth_ledger::Address;
use thiserror::Error;

/// Result type alias for wallet operations.
pub type Result<T> = std::result::Result<T, WalletError>;

/// Errors produced by wallet linking.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum WalletError {
    /// The signature over the challenge was not produced by the claimed
    /// address. Nothing was persisted.
    #[error("Signature verification failed: signed by {recovered}, claimed {claimed}")]
    SignatureVerificationFailed {
        /// The address the caller claimed.
        claimed: Address,
        /// The address that actually signed.
        recovered: Address,
    },

    /// The signature is not a well-formed 65-byte recoverable signature.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The claimed address is not a 20-byte hex address.
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    /// The user identifier is empty.
    #[error("User id must not be empty")]
    InvalidUserId,

    /// The address is already linked to another user.
    #[error("Wallet {address} is already linked to another user")]
    AddressInUse {
        /// The contested address.
        address: Address,
    },

    /// The binding store failed.
    #[error("Wallet binding store error: {0}")]
    Store(String),
}

impl WalletError {
    /// Returns `true` for errors caused by the caller's input rather than
    /// the service.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}
