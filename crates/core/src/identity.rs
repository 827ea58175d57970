//! Identity proof implementation.
//!
//! An identity proof is the raw evidence of control over an external
//! identity: a wallet signature over a structured sign-in statement, a
//! previously-validated OAuth access token, or a biometric assertion from an
//! external authenticator service. Proofs are immutable once produced and
//! expire implicitly when their embedded statement's expiration passes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{self, Address, SigningKey, WalletSignature};
use crate::errors::Error;
use crate::statement::SignInStatement;

/// The marker recorded for wallet signatures produced via the
/// personal-message signing path.
pub const DERIVED_VIA_PERSONAL_SIGN: &str = "eth.personal.sign";

/// An authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// A wallet signature over a structured sign-in statement.
    WalletSignature,
    /// A previously-obtained and externally-verified OAuth access token.
    OauthToken,
    /// A biometric assertion from an external authenticator service.
    WebauthnAssertion,
}

/// The method-specific payload of an identity proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProofPayload {
    /// A wallet signature packaged with the exact statement it covers.
    Wallet(WalletProof),
    /// A bearer token validated by the external identity provider.
    Oauth {
        /// The validated access token.
        access_token: String,
    },
    /// An opaque assertion object returned by the authenticator service.
    Webauthn {
        /// The assertion exactly as the external service produced it.
        assertion: serde_json::Value,
    },
}

/// A wallet-signature proof payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletProof {
    /// The recoverable signature, `0x`-prefixed hex.
    pub signature: String,
    /// Marker for the signing path used by the wallet.
    pub derived_via: String,
    /// The exact statement rendering that was signed, byte for byte.
    pub signed_message: String,
    /// The lowercased signer address.
    pub address: String,
}

/// A proof of control over an external identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProof {
    /// The authentication method that produced this proof.
    pub method: AuthMethod,
    /// Stable identifier for the identity (lowercased address, handle or credential id).
    pub method_id: String,
    /// The method-specific evidence.
    pub payload: ProofPayload,
}

impl IdentityProof {
    /// Given a wallet signer and a sign-in statement, requests a signature over
    /// the statement's exact canonical rendering and returns the wallet proof.
    ///
    /// A wallet rejection surfaces as [`Error::UserRejected`]; there is no retry.
    pub fn for_wallet(
        signer: &impl WalletSigner,
        statement: &SignInStatement,
    ) -> Result<Self, Error> {
        let message = statement.render();
        let signature = signer.sign_message(message.as_bytes())?;
        let address = signer.address();
        Ok(Self {
            method: AuthMethod::WalletSignature,
            method_id: address.to_lower_hex(),
            payload: ProofPayload::Wallet(WalletProof {
                signature: signature.to_hex(),
                derived_via: DERIVED_VIA_PERSONAL_SIGN.to_owned(),
                signed_message: message,
                address: address.to_lower_hex(),
            }),
        })
    }

    /// Given an externally-verified handle and its access token, returns an
    /// OAuth identity proof.
    ///
    /// The secret-bearing code-for-token exchange is not performed here; it
    /// belongs behind the authorization service boundary.
    pub fn for_oauth(handle: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            method: AuthMethod::OauthToken,
            method_id: handle.into(),
            payload: ProofPayload::Oauth {
                access_token: access_token.into(),
            },
        }
    }

    /// Given a credential id and the assertion object returned by the external
    /// authenticator service, returns a WebAuthn identity proof.
    pub fn for_webauthn(credential_id: impl Into<String>, assertion: serde_json::Value) -> Self {
        Self {
            method: AuthMethod::WebauthnAssertion,
            method_id: credential_id.into(),
            payload: ProofPayload::Webauthn { assertion },
        }
    }

    /// Returns the parsed sign-in statement for a wallet proof, or `None` for
    /// other methods.
    pub fn signed_statement(&self) -> Option<Result<SignInStatement, Error>> {
        match &self.payload {
            ProofPayload::Wallet(proof) => Some(SignInStatement::parse(&proof.signed_message)),
            _ => None,
        }
    }

    /// Returns an `Ok` result if the proof is internally consistent and
    /// unexpired at `now`, or an appropriate `Err` result otherwise.
    ///
    /// For wallet proofs this re-parses the signed statement, checks its
    /// freshness and verifies that the signature recovers to the claimed
    /// address. Other methods carry externally-verified evidence and are only
    /// checked for presence.
    pub fn verify(&self, now: DateTime<Utc>) -> Result<(), Error> {
        match &self.payload {
            ProofPayload::Wallet(proof) => {
                let statement = SignInStatement::parse(&proof.signed_message)?;
                statement.check_fresh(now)?;
                let signature = WalletSignature::from_hex(&proof.signature)?;
                let address = Address::from_hex(&proof.address)?;
                crypto::verify_wallet_signature(
                    proof.signed_message.as_bytes(),
                    &signature,
                    &address,
                )?;
                Ok(())
            }
            ProofPayload::Oauth { access_token } => {
                if access_token.is_empty() {
                    return Err(Error::Validation {
                        field: "payload.access_token".to_owned(),
                        message: "access token is empty".to_owned(),
                    });
                }
                Ok(())
            }
            ProofPayload::Webauthn { assertion } => {
                if assertion.is_null() {
                    return Err(Error::Validation {
                        field: "payload.assertion".to_owned(),
                        message: "assertion is missing".to_owned(),
                    });
                }
                Ok(())
            }
        }
    }
}

/// An external wallet that signs UTF-8 statements and transaction payloads.
///
/// Implementations surface a declined signature request as
/// [`Error::UserRejected`]; every request is a single user-initiated attempt.
pub trait WalletSigner {
    /// Returns the wallet's account address.
    fn address(&self) -> Address;

    /// Requests a personal-message signature over the exact message bytes.
    fn sign_message(&self, message: &[u8]) -> Result<WalletSignature, Error>;

    /// Requests a signature over a transaction signing payload.
    fn sign_transaction(&self, payload: &[u8]) -> Result<WalletSignature, Error>;
}

impl<W: WalletSigner + ?Sized> WalletSigner for &W {
    fn address(&self) -> Address {
        (**self).address()
    }

    fn sign_message(&self, message: &[u8]) -> Result<WalletSignature, Error> {
        (**self).sign_message(message)
    }

    fn sign_transaction(&self, payload: &[u8]) -> Result<WalletSignature, Error> {
        (**self).sign_transaction(payload)
    }
}

/// A wallet backed by an in-memory secp256k1 signing key.
///
/// Used where the caller holds a raw key (e.g. an administrative minting
/// key); interactive wallets implement [`WalletSigner`] against their own
/// transport instead.
pub struct LocalWallet {
    signing_key: SigningKey,
}

impl LocalWallet {
    /// Returns a wallet wrapping the given signing key.
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Parses a wallet from a hex-encoded private key, zeroizing the
    /// intermediate key bytes.
    pub fn from_hex_key(value: &str) -> Result<Self, Error> {
        let stripped = value.strip_prefix("0x").unwrap_or(value);
        let bytes = Zeroizing::new(hex::decode(stripped).map_err(|_| Error::Validation {
            field: "private_key".to_owned(),
            message: "invalid hex encoding".to_owned(),
        })?);
        let signing_key = SigningKey::from_slice(&bytes).map_err(|_| Error::Validation {
            field: "private_key".to_owned(),
            message: "not a valid secp256k1 scalar".to_owned(),
        })?;
        Ok(Self { signing_key })
    }

    /// Generates a wallet with a fresh random key.
    pub fn random() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }
}

impl WalletSigner for LocalWallet {
    fn address(&self) -> Address {
        crypto::address_of(self.signing_key.verifying_key())
    }

    fn sign_message(&self, message: &[u8]) -> Result<WalletSignature, Error> {
        Ok(crypto::sign_message(&self.signing_key, message))
    }

    fn sign_transaction(&self, payload: &[u8]) -> Result<WalletSignature, Error> {
        let digest = crypto::keccak256(payload);
        Ok(crypto::sign_prehash(&self.signing_key, &digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{example_statement_for, RejectingWallet};
    use chrono::Duration;

    #[test]
    fn wallet_proof_works() {
        let wallet = LocalWallet::random();
        let statement = example_statement_for(&wallet, vec!["entrust-sign://*".to_owned()]);

        let proof = IdentityProof::for_wallet(&wallet, &statement).unwrap();

        assert_eq!(proof.method, AuthMethod::WalletSignature);
        assert_eq!(proof.method_id, wallet.address().to_lower_hex());
        assert!(proof.verify(Utc::now()).is_ok());

        // The signed message is the exact canonical rendering.
        let ProofPayload::Wallet(payload) = &proof.payload else {
            panic!("expected wallet payload");
        };
        assert_eq!(payload.signed_message, statement.render());
        assert_eq!(payload.derived_via, DERIVED_VIA_PERSONAL_SIGN);
    }

    #[test]
    fn wallet_proof_expires_with_its_statement() {
        let wallet = LocalWallet::random();
        let statement = example_statement_for(&wallet, vec![]);
        let proof = IdentityProof::for_wallet(&wallet, &statement).unwrap();

        assert_eq!(
            proof.verify(statement.expiration + Duration::seconds(1)),
            Err(Error::Expired(statement.expiration))
        );
    }

    #[test]
    fn tampered_wallet_proof_is_rejected() {
        let wallet = LocalWallet::random();
        let statement = example_statement_for(&wallet, vec![]);
        let mut proof = IdentityProof::for_wallet(&wallet, &statement).unwrap();

        // Claiming a different address invalidates the proof.
        let other = LocalWallet::random().address();
        if let ProofPayload::Wallet(payload) = &mut proof.payload {
            payload.address = other.to_lower_hex();
        }
        assert!(matches!(proof.verify(Utc::now()), Err(Error::Crypto(_))));
    }

    #[test]
    fn wallet_rejection_surfaces_as_user_rejected() {
        let wallet = RejectingWallet::default();
        let statement = example_statement_for(&wallet, vec![]);

        assert_eq!(
            IdentityProof::for_wallet(&wallet, &statement),
            Err(Error::UserRejected)
        );
    }

    #[test]
    fn oauth_proof_requires_a_token() {
        let proof = IdentityProof::for_oauth("@creator", "token-123");
        assert!(proof.verify(Utc::now()).is_ok());

        let empty = IdentityProof::for_oauth("@creator", "");
        assert!(matches!(
            empty.verify(Utc::now()),
            Err(Error::Validation { field, .. }) if field == "payload.access_token"
        ));
    }
}
