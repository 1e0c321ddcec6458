//! Wallet linking for E-Health users.
//!
//! A user proves control of a ledger address by signing the challenge
//! `"Connect to E-Health: {user_id}"` as an EIP-191 personal message.
//! [`WalletLinker::link_wallet`] recovers the signer, compares it with the
//! claimed address and, on a match, replaces the user's binding. Bindings
//! are what the access service resolves before asking the ledger about
//! consent.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod binding;
pub mod challenge;
pub mod error;
pub mod linker;

/// User bindings and their store.
pub use binding::{MemoryWalletBindingStore, UserId, WalletBinding, WalletBindingStore};
/// The challenge message and its recovery.
pub use challenge::{CHALLENGE_PREFIX, challenge_message, recover_challenge_signer};
/// Error types.
pub use error::{Result, WalletError};
/// The linking service.
pub use linker::WalletLinker;
