//! Wallet linking by signature challenge.

use std::sync::Arc;

use chrono::Utc;
use ehealth_ledger::Address;

use crate::{
    binding::{UserId, WalletBinding, WalletBindingStore},
    challenge::recover_challenge_signer,
    error::{Result, WalletError},
};

/// Binds users to ledger addresses they prove they control.
#[derive(Clone)]
pub struct WalletLinker {
    store: Arc<dyn WalletBindingStore>,
}

impl WalletLinker {
    /// Creates a linker over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn WalletBindingStore>) -> Self {
        Self { store }
    }

    /// Links `claimed_address` to `user_id` if `signature` over the user's
    /// challenge recovers to that address.
    ///
    /// Address comparison is case-insensitive. The stored address is the
    /// recovered one. A previous binding of the same user is replaced.
    ///
    /// # Errors
    ///
    /// - [`WalletError::InvalidAddress`] / [`WalletError::InvalidSignature`]
    ///   for malformed input
    /// - [`WalletError::SignatureVerificationFailed`] if someone else signed;
    ///   nothing is persisted
    /// - [`WalletError::AddressInUse`] if another user owns the address
    #[tracing::instrument(skip_all, fields(user_id = %user_id, claimed = claimed_address))]
    pub async fn link_wallet(
        &self,
        user_id: &UserId,
        claimed_address: &str,
        signature: &str,
    ) -> Result<WalletBinding> {
        let claimed: Address = claimed_address
            .parse()
            .map_err(|_| WalletError::InvalidAddress(claimed_address.to_owned()))?;
        let recovered = recover_challenge_signer(user_id, signature)?;

        if recovered != claimed {
            tracing::warn!(
                claimed = %claimed,
                recovered = %recovered,
                "wallet link rejected: signer does not match claimed address",
            );
            return Err(WalletError::SignatureVerificationFailed { claimed, recovered });
        }

        let binding =
            WalletBinding { user_id: user_id.clone(), wallet_address: recovered, linked_at: Utc::now() };
        let previous = self.store.replace(binding.clone()).await?;

        tracing::info!(
            audit.action = "link_wallet",
            audit.resource = %user_id,
            audit.result = "success",
            wallet = %recovered,
            replaced = previous.is_some(),
            "audit_event",
        );
        Ok(binding)
    }

    /// Returns the wallet currently linked to `user_id`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn wallet_of(&self, user_id: &UserId) -> Result<Option<Address>> {
        Ok(self.store.get(user_id).await?.map(|binding| binding.wallet_address))
    }
}

impl std::fmt::Debug for WalletLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletLinker").finish_non_exhaustive()
    }
}
