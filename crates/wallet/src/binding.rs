//! User-to-wallet bindings and their store.

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ehealth_ledger::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

/// Identifier of a platform user, as issued by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a user identifier.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidUserId`] for an empty or blank id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(WalletError::InvalidUserId);
        }
        Ok(Self(id))
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The one wallet currently linked to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBinding {
    /// The user.
    pub user_id: UserId,
    /// The linked address, as recovered from the signature.
    pub wallet_address: Address,
    /// When the link was made.
    pub linked_at: DateTime<Utc>,
}

/// Persistence for wallet bindings.
///
/// Implementations keep at most one binding per user and at most one user
/// per address.
#[async_trait]
pub trait WalletBindingStore: Send + Sync {
    /// Returns the binding of `user_id`, if any.
    async fn get(&self, user_id: &UserId) -> Result<Option<WalletBinding>>;

    /// Replaces the binding of `binding.user_id` and returns the previous
    /// one.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::AddressInUse`] if the address is bound to a
    /// different user; the store is unchanged.
    async fn replace(&self, binding: WalletBinding) -> Result<Option<WalletBinding>>;
}

#[derive(Debug, Default)]
struct Bindings {
    by_user: HashMap<UserId, WalletBinding>,
    by_address: HashMap<Address, UserId>,
}

/// In-memory [`WalletBindingStore`].
#[derive(Debug, Default)]
pub struct MemoryWalletBindingStore {
    inner: RwLock<Bindings>,
}

impl MemoryWalletBindingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of linked users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_user.len()
    }

    /// Returns `true` if no user is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_user.is_empty()
    }

    /// Returns the user linked to `address`, if any.
    #[must_use]
    pub fn owner_of(&self, address: Address) -> Option<UserId> {
        self.inner.read().by_address.get(&address).cloned()
    }
}

#[async_trait]
impl WalletBindingStore for MemoryWalletBindingStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<WalletBinding>> {
        Ok(self.inner.read().by_user.get(user_id).cloned())
    }

    async fn replace(&self, binding: WalletBinding) -> Result<Option<WalletBinding>> {
        let mut inner = self.inner.write();
        if let Some(owner) = inner.by_address.get(&binding.wallet_address)
            && *owner != binding.user_id
        {
            return Err(WalletError::AddressInUse { address: binding.wallet_address });
        }

        let previous = inner.by_user.insert(binding.user_id.clone(), binding.clone());
        if let Some(previous) = &previous {
            inner.by_address.remove(&previous.wallet_address);
        }
        inner.by_address.insert(binding.wallet_address, binding.user_id);
        Ok(previous)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn binding(user: &str, byte: u8) -> WalletBinding {
        WalletBinding {
            user_id: UserId::new(user).unwrap(),
            wallet_address: Address::new([byte; 20]),
            linked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn replacing_frees_the_old_address() {
        let store = MemoryWalletBindingStore::new();
        assert!(store.replace(binding("alice", 1)).await.unwrap().is_none());
        let previous = store.replace(binding("alice", 2)).await.unwrap().unwrap();
        assert_eq!(previous.wallet_address, Address::new([1; 20]));

        assert_eq!(store.owner_of(Address::new([1; 20])), None);
        assert!(store.replace(binding("bob", 1)).await.is_ok());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn address_cannot_serve_two_users() {
        let store = MemoryWalletBindingStore::new();
        store.replace(binding("alice", 1)).await.unwrap();
        let err = store.replace(binding("bob", 1)).await.unwrap_err();
        assert_eq!(err, WalletError::AddressInUse { address: Address::new([1; 20]) });
        assert!(store.get(&UserId::new("bob").unwrap()).await.unwrap().is_none());
    }

    #[test]
    fn blank_user_ids_are_rejected() {
        assert_eq!(UserId::new("  "), Err(WalletError::InvalidUserId));
    }
}
