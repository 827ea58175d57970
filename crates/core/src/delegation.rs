//! Capability delegation and auth context implementation.
//!
//! The delegation builder turns an identity proof, a key handle and a
//! requested delegation scope into an auth context: the bundle the signer
//! network requires before it will cooperate to sign a payload or execute
//! remote code with the custodied key.
//!
//! Two construction paths exist. The non-interactive path binds a
//! fully-formed identity proof directly. The interactive path is a
//! suspension point: the verifier supplies a fresh nonce, the builder
//! renders a sign-in statement with that nonce and the scope's capability
//! URIs, and a fresh wallet signature completes the context. The interactive
//! path may be taken again at any time while the scope is fresh if the
//! network demands re-proof.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{self, Address, WalletSignature};
use crate::errors::Error;
use crate::identity::{IdentityProof, ProofPayload, WalletSigner};
use crate::key_handle::KeyHandle;
use crate::scope::{self, CapabilityKind, DelegationScope, SchemeSet};
use crate::statement::SignInStatement;

/// How long an issued statement backdates its issued-at timestamp to absorb
/// clock skew between the builder and the verifying nodes.
const ISSUED_AT_SKEW_SECONDS: i64 = 30;

/// The signed capability artifact bound into an auth context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDelegation {
    /// The capability URIs the delegation covers, as rendered into the
    /// signed evidence, in request order.
    pub resources: Vec<String>,
    /// For wallet-backed delegations, the exact signed statement rendering.
    pub signed_statement: Option<String>,
    /// For wallet-backed delegations, the recoverable signature, `0x`-prefixed hex.
    pub signature: Option<String>,
}

/// An auth context: the complete bundle presented to the signer network.
///
/// Built once per operation-session and treated as borrowed, read-only input
/// by the network client; the owner is responsible for discarding it once
/// the scope's expiration passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// The bound identity proof.
    pub proof: IdentityProof,
    /// The bound key handle.
    pub key_handle: KeyHandle,
    /// The bound delegation scope.
    pub scope: DelegationScope,
    /// The derived signed-capability artifact.
    pub delegation: SignedDelegation,
}

impl AuthContext {
    /// Returns whether the bound scope has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.scope.expiration <= now
    }
}

/// Given a fully-formed identity proof, a key handle and a delegation scope,
/// binds them directly into an auth context (the non-interactive path).
///
/// For wallet proofs the signed statement itself is the capability artifact,
/// so its embedded resources must already cover the scope rendered under the
/// given scheme set. Proofs from other methods delegate validation of the
/// evidence to the network and only pin the rendered resources.
pub fn bind(
    proof: IdentityProof,
    key_handle: KeyHandle,
    scope: DelegationScope,
    schemes: &SchemeSet,
) -> Result<AuthContext, Error> {
    scope.check_fresh(Utc::now())?;
    let resources = scope.render_resources(schemes);

    let delegation = match &proof.payload {
        ProofPayload::Wallet(wallet) => {
            let statement = SignInStatement::parse(&wallet.signed_message)?;
            // The signed statement bounds everything delegated through it; a
            // scope that outlives it would pass the local freshness check
            // while every node rejects the lapsed evidence.
            if scope.expiration > statement.expiration {
                return Err(Error::Validation {
                    field: "scope.expiration".to_owned(),
                    message: format!(
                        "exceeds the signed statement's expiration ({})",
                        statement.expiration
                    ),
                });
            }
            for resource in &resources {
                if !statement.resources.contains(resource) {
                    return Err(Error::CapabilityNotFound {
                        resource: resource.clone(),
                    });
                }
            }
            SignedDelegation {
                resources,
                signed_statement: Some(wallet.signed_message.clone()),
                signature: Some(wallet.signature.clone()),
            }
        }
        _ => SignedDelegation {
            resources,
            signed_statement: None,
            signature: None,
        },
    };

    Ok(AuthContext {
        proof,
        key_handle,
        scope,
        delegation,
    })
}

/// Given a wallet address, a delegation scope, a verifier-supplied nonce and
/// a chain id, returns the sign-in statement for the interactive path.
pub fn sign_in_statement(
    address: Address,
    scope: &DelegationScope,
    schemes: &SchemeSet,
    nonce: impl Into<String>,
    chain_id: u64,
) -> SignInStatement {
    let now = Utc::now();
    SignInStatement {
        domain: scope.domain.clone(),
        address,
        statement: scope.statement.clone(),
        uri: scope.audience.clone(),
        chain_id,
        nonce: nonce.into(),
        issued_at: now - Duration::seconds(ISSUED_AT_SKEW_SECONDS),
        expiration: scope.expiration,
        resources: scope.render_resources(schemes),
    }
}

/// Given a wallet signer, a key handle, a delegation scope and a fresh
/// verifier-supplied nonce, completes the interactive path: renders the
/// statement, awaits the wallet signature and returns the auth context.
///
/// May be invoked again with a new nonce whenever the network requires
/// re-proof; each invocation produces an independent context over the same
/// scope.
pub fn delegate_with_nonce(
    signer: &impl WalletSigner,
    key_handle: KeyHandle,
    scope: DelegationScope,
    schemes: &SchemeSet,
    nonce: impl Into<String>,
    chain_id: u64,
) -> Result<AuthContext, Error> {
    scope.check_fresh(Utc::now())?;
    let statement = sign_in_statement(signer.address(), &scope, schemes, nonce, chain_id);
    let proof = IdentityProof::for_wallet(signer, &statement)?;
    bind(proof, key_handle, scope, schemes)
}

/// Given an auth context, the capability kind and resource a request needs,
/// and the verifier's scheme set, performs the verifier-side check:
/// freshness, evidence integrity and capability coverage.
///
/// This is the check each signing node runs before cooperating. A delegation
/// rendered under a different scheme set fails with
/// [`Error::CapabilityNotFound`] and no other category.
pub fn verify(
    context: &AuthContext,
    kind: CapabilityKind,
    resource: &str,
    schemes: &SchemeSet,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    context.scope.check_fresh(now)?;

    match &context.proof.payload {
        ProofPayload::Wallet(wallet) => {
            // The statement is the authoritative evidence: re-parse the exact
            // signed bytes rather than trusting the unsigned scope copy.
            let signed_statement = context
                .delegation
                .signed_statement
                .as_deref()
                .ok_or_else(|| Error::Validation {
                    field: "delegation.signed_statement".to_owned(),
                    message: "wallet delegation carries no signed statement".to_owned(),
                })?;
            let statement = SignInStatement::parse(signed_statement)?;
            statement.check_fresh(now)?;

            let signature = context
                .delegation
                .signature
                .as_deref()
                .ok_or_else(|| Error::Validation {
                    field: "delegation.signature".to_owned(),
                    message: "wallet delegation carries no signature".to_owned(),
                })?;
            let signature = WalletSignature::from_hex(signature)?;
            let address = Address::from_hex(&wallet.address)?;
            crypto::verify_wallet_signature(signed_statement.as_bytes(), &signature, &address)?;

            scope::match_capability(&statement.resources, kind, resource, schemes)
        }
        _ => {
            context.proof.verify(now)?;
            scope::match_capability(&context.delegation.resources, kind, resource, schemes)
        }
    }
}
