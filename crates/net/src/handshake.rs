//! Handshake orchestration implementation.
//!
//! Ties the four stages together for a caller: produce an identity proof for
//! the chosen authentication strategy, resume or mint the custodied key,
//! build the capability delegation and hand back the auth context the signer
//! network accepts. Every strategy runs through the same flow; only the
//! proof production and the delegation path differ per method.

use entrust_core::{
    crypto, delegation, AuthContext, AuthMethod, DelegationScope, IdentityProof, KeyHandle,
    SchemeSet, SessionStore, SessionVault, WalletSigner,
};

use crate::chain::ChainClient;
use crate::client::NetworkClient;
use crate::errors::Error;
use crate::registrar::{self, AuthService, MintScope};

/// An authentication strategy for the handshake.
pub enum AuthStrategy<'a> {
    /// Interactive wallet authentication.
    Wallet {
        /// The wallet that signs statements and transactions.
        signer: &'a dyn WalletSigner,
        /// The chain id embedded in signed statements.
        chain_id: u64,
    },
    /// A validated OAuth grant.
    Oauth {
        /// The provider handle of the authenticated account.
        handle: String,
        /// The validated access token.
        access_token: String,
    },
    /// A WebAuthn assertion from an external authenticator service.
    Webauthn {
        /// The credential id.
        credential_id: String,
        /// The assertion exactly as the service produced it.
        assertion: serde_json::Value,
    },
}

impl AuthStrategy<'_> {
    fn wallet(&self) -> Option<&dyn WalletSigner> {
        match self {
            AuthStrategy::Wallet { signer, .. } => Some(*signer),
            _ => None,
        }
    }
}

/// Given an OAuth authorization code, exchanges it at the service boundary
/// and returns the ready-to-run strategy.
pub async fn exchange_oauth_code(
    service: &dyn AuthService,
    code: &str,
    redirect_uri: &str,
) -> Result<AuthStrategy<'static>, Error> {
    let grant = service.exchange_oauth(code, redirect_uri).await?;
    Ok(AuthStrategy::Oauth {
        handle: grant.handle,
        access_token: grant.access_token,
    })
}

/// The handshake orchestrator.
///
/// Borrows its collaborators so a host application can share them across
/// handshakes; the session vault is exclusive because each run may overwrite
/// the persisted artifacts.
pub struct Handshake<'a, S: SessionStore> {
    /// The trusted authorization service.
    pub auth_service: &'a dyn AuthService,
    /// The chain client for direct registry mints.
    pub chain: &'a dyn ChainClient,
    /// The signer network.
    pub network: &'a NetworkClient,
    /// The encrypted session vault.
    pub vault: &'a mut SessionVault<S>,
    /// The capability URI schemes delegations are rendered under.
    pub schemes: SchemeSet,
}

impl<S: SessionStore> Handshake<'_, S> {
    /// Runs the handshake and returns an auth context over the given scope.
    ///
    /// A persisted key handle is resumed instead of re-minted. For wallet
    /// strategies, a persisted proof that is still fresh and covers the
    /// scope is rebound without another signature request; otherwise the
    /// network supplies a fresh nonce and the wallet signs a new delegation
    /// statement.
    pub async fn run(
        &mut self,
        strategy: &AuthStrategy<'_>,
        scope: DelegationScope,
        mint_scopes: &[MintScope],
    ) -> Result<AuthContext, Error> {
        let resumed = self.vault.load()?;

        if let (Some(session), AuthStrategy::Wallet { .. }) = (&resumed, strategy) {
            if let Some(proof) = &session.proof {
                if proof.method == AuthMethod::WalletSignature {
                    if let Ok(context) = delegation::bind(
                        proof.clone(),
                        session.key_handle.clone(),
                        scope.clone(),
                        &self.schemes,
                    ) {
                        tracing::info!("rebound persisted wallet proof without a new signature");
                        return Ok(context);
                    }
                }
            }
        }

        let key_handle = match resumed {
            Some(session) => {
                tracing::info!(
                    token_id = %session.key_handle.token_id_hex(),
                    "resumed custodied key from the session store"
                );
                session.key_handle
            }
            None => {
                let proof = self.identity_proof(strategy, &scope)?;
                let key_handle = registrar::mint(
                    self.auth_service,
                    self.chain,
                    strategy.wallet(),
                    &proof,
                    mint_scopes,
                )
                .await?;
                tracing::info!(token_id = %key_handle.token_id_hex(), "minted custodied key");
                self.vault.save(&key_handle, &proof)?;
                key_handle
            }
        };

        self.build_context(strategy, key_handle, scope).await
    }

    /// Re-runs the delegation stage over an existing context's scope, e.g.
    /// when the network demands re-proof mid-session.
    pub async fn renew(
        &self,
        strategy: &AuthStrategy<'_>,
        context: &AuthContext,
    ) -> Result<AuthContext, Error> {
        self.build_context(strategy, context.key_handle.clone(), context.scope.clone())
            .await
    }

    fn identity_proof(
        &self,
        strategy: &AuthStrategy<'_>,
        scope: &DelegationScope,
    ) -> Result<IdentityProof, Error> {
        match strategy {
            AuthStrategy::Wallet { signer, chain_id } => {
                // The mint proof carries a locally-generated nonce; the
                // network-supplied nonce only enters the delegation statement.
                let statement = delegation::sign_in_statement(
                    signer.address(),
                    scope,
                    &self.schemes,
                    crypto::random_nonce(),
                    *chain_id,
                );
                Ok(IdentityProof::for_wallet(signer, &statement)?)
            }
            AuthStrategy::Oauth {
                handle,
                access_token,
            } => Ok(IdentityProof::for_oauth(handle.clone(), access_token.clone())),
            AuthStrategy::Webauthn {
                credential_id,
                assertion,
            } => Ok(IdentityProof::for_webauthn(
                credential_id.clone(),
                assertion.clone(),
            )),
        }
    }

    async fn build_context(
        &self,
        strategy: &AuthStrategy<'_>,
        key_handle: KeyHandle,
        scope: DelegationScope,
    ) -> Result<AuthContext, Error> {
        match strategy {
            AuthStrategy::Wallet { signer, chain_id } => {
                let connection = self.network.connect();
                let nonce = connection.fresh_nonce().await?;
                Ok(delegation::delegate_with_nonce(
                    signer,
                    key_handle,
                    scope,
                    &self.schemes,
                    nonce,
                    *chain_id,
                )?)
            }
            _ => {
                let proof = self.identity_proof(strategy, &scope)?;
                Ok(delegation::bind(proof, key_handle, scope, &self.schemes)?)
            }
        }
    }
}
