//! Utilities for testing.

use chrono::{DateTime, Duration, DurationRound, Utc};
use crypto_bigint::U256;

use crate::crypto::{self, Address, SigningKey, WalletSignature};
use crate::errors::Error;
use crate::identity::WalletSigner;
use crate::key_handle::KeyHandle;
use crate::scope::{DelegationScope, Resource};
use crate::statement::SignInStatement;

/// A wallet that declines every signature request.
#[derive(Debug, Default)]
pub struct RejectingWallet;

impl WalletSigner for RejectingWallet {
    fn address(&self) -> Address {
        Address([0x22; 20])
    }

    fn sign_message(&self, _message: &[u8]) -> Result<WalletSignature, Error> {
        Err(Error::UserRejected)
    }

    fn sign_transaction(&self, _payload: &[u8]) -> Result<WalletSignature, Error> {
        Err(Error::UserRejected)
    }
}

/// Returns a sign-in statement for the wallet with the given resources and a
/// ten-minute expiration.
pub fn example_statement_for(
    signer: &impl WalletSigner,
    resources: Vec<String>,
) -> SignInStatement {
    let mut statement =
        example_statement_with_expiration(signer, Utc::now() + Duration::minutes(10));
    statement.resources = resources;
    statement
}

/// Returns a sign-in statement for the wallet with the given expiration.
pub fn example_statement_with_expiration(
    signer: &impl WalletSigner,
    expiration: DateTime<Utc>,
) -> SignInStatement {
    // Timestamps are truncated to the millisecond precision of the canonical
    // rendering so that parse round-trips compare equal.
    SignInStatement {
        domain: "app.example.com".to_owned(),
        address: signer.address(),
        statement: "Sign in to delegate signing".to_owned(),
        uri: "https://app.example.com".to_owned(),
        chain_id: 175188,
        nonce: crypto::random_nonce(),
        issued_at: truncate_to_millis(Utc::now()),
        expiration: truncate_to_millis(expiration),
        resources: Vec::new(),
    }
}

fn truncate_to_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    value
        .duration_trunc(Duration::milliseconds(1))
        .expect("millisecond truncation never overflows")
}

/// Generates a custodied key pair and returns its handle alongside the
/// signing key that stands in for the network's threshold shares.
pub fn example_key_handle() -> (KeyHandle, SigningKey) {
    let signing_key = SigningKey::random(&mut rand::thread_rng());
    let handle = KeyHandle::new(
        signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec(),
        random_token_id(),
    );
    (handle, signing_key)
}

/// Returns a delegation scope over the given resources with a ten-minute expiration.
pub fn example_scope(resources: Vec<Resource>) -> DelegationScope {
    DelegationScope::new(
        resources,
        Utc::now() + Duration::minutes(10),
        "Delegate signing to this session",
        "app.example.com",
        "https://app.example.com",
    )
    .expect("A ten-minute expiration should be in the future")
}

/// Returns a random custody token id.
pub fn random_token_id() -> U256 {
    crypto::random_mod()
}
