//! Wallet linking through the public API.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use ehealth_ledger::AdminSigner;
use ehealth_wallet::{
    MemoryWalletBindingStore, UserId, WalletError, WalletLinker, challenge_message,
};
use rstest::rstest;

fn setup() -> (WalletLinker, Arc<MemoryWalletBindingStore>) {
    let store = Arc::new(MemoryWalletBindingStore::new());
    (WalletLinker::new(store.clone()), store)
}

fn sign_challenge(wallet: &AdminSigner, user: &UserId) -> String {
    wallet.sign_personal_message(&challenge_message(user)).unwrap().to_hex()
}

#[tokio::test]
async fn links_the_recovered_address() {
    let (linker, _) = setup();
    let user = UserId::new("65f0c1a2b3c4d5e6f7a8b9c0").unwrap();
    let wallet = AdminSigner::random();

    let binding = linker
        .link_wallet(&user, &wallet.address().to_checksum(), &sign_challenge(&wallet, &user))
        .await
        .unwrap();

    assert_eq!(binding.wallet_address, wallet.address());
    assert_eq!(linker.wallet_of(&user).await.unwrap(), Some(wallet.address()));
}

#[rstest]
#[case::lowercase(false)]
#[case::uppercase(true)]
#[tokio::test]
async fn claimed_address_case_is_ignored(#[case] upper: bool) {
    let (linker, _) = setup();
    let user = UserId::new("alice").unwrap();
    let wallet = AdminSigner::random();
    let hex = wallet.address().to_string();
    let claimed = if upper { format!("0x{}", hex[2..].to_uppercase()) } else { hex };

    linker.link_wallet(&user, &claimed, &sign_challenge(&wallet, &user)).await.unwrap();
    assert_eq!(linker.wallet_of(&user).await.unwrap(), Some(wallet.address()));
}

#[tokio::test]
async fn signature_from_another_key_persists_nothing() {
    let (linker, store) = setup();
    let user = UserId::new("alice").unwrap();
    let claimed = AdminSigner::random();
    let actual = AdminSigner::random();

    let err = linker
        .link_wallet(&user, &claimed.address().to_string(), &sign_challenge(&actual, &user))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        WalletError::SignatureVerificationFailed {
            claimed: claimed.address(),
            recovered: actual.address(),
        }
    );
    assert!(store.is_empty());
}

#[tokio::test]
async fn challenge_of_another_user_does_not_verify() {
    let (linker, store) = setup();
    let alice = UserId::new("alice").unwrap();
    let mallory = UserId::new("mallory").unwrap();
    let wallet = AdminSigner::random();

    let result = linker
        .link_wallet(&mallory, &wallet.address().to_string(), &sign_challenge(&wallet, &alice))
        .await;

    assert!(matches!(result, Err(WalletError::SignatureVerificationFailed { .. })));
    assert!(store.is_empty());
}

#[tokio::test]
async fn relink_replaces_the_binding() {
    let (linker, store) = setup();
    let user = UserId::new("alice").unwrap();
    let first = AdminSigner::random();
    let second = AdminSigner::random();

    linker.link_wallet(&user, &first.address().to_string(), &sign_challenge(&first, &user)).await.unwrap();
    linker.link_wallet(&user, &second.address().to_string(), &sign_challenge(&second, &user)).await.unwrap();

    assert_eq!(linker.wallet_of(&user).await.unwrap(), Some(second.address()));
    assert_eq!(store.len(), 1);
    assert_eq!(store.owner_of(first.address()), None);
}

#[tokio::test]
async fn failed_relink_keeps_the_existing_binding() {
    let (linker, store) = setup();
    let user = UserId::new("alice").unwrap();
    let linked = AdminSigner::random();
    let claimed = AdminSigner::random();
    let forger = AdminSigner::random();

    linker.link_wallet(&user, &linked.address().to_string(), &sign_challenge(&linked, &user)).await.unwrap();
    let err = linker
        .link_wallet(&user, &claimed.address().to_string(), &sign_challenge(&forger, &user))
        .await
        .unwrap_err();

    assert!(matches!(err, WalletError::SignatureVerificationFailed { .. }));
    assert_eq!(linker.wallet_of(&user).await.unwrap(), Some(linked.address()));
    assert_eq!(store.owner_of(linked.address()), Some(user.clone()));
    assert_eq!(store.owner_of(claimed.address()), None);
    assert_eq!(store.len(), 1);
}

#[rstest]
#[case::bad_address("not-an-address", None)]
#[case::short_signature("0x0000000000000000000000000000000000000001", Some("0xdeadbeef"))]
#[tokio::test]
async fn malformed_input_is_a_client_error(#[case] address: &str, #[case] signature: Option<&str>) {
    let (linker, store) = setup();
    let user = UserId::new("alice").unwrap();
    let wallet = AdminSigner::random();
    let signature = signature.map_or_else(|| sign_challenge(&wallet, &user), str::to_owned);

    let err = linker.link_wallet(&user, address, &signature).await.unwrap_err();
    assert!(
        matches!(err, WalletError::InvalidAddress(_) | WalletError::InvalidSignature(_)),
        "{err:?}"
    );
    assert!(err.is_client_error());
    assert!(store.is_empty());
}
