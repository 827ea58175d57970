//! Key-custody registrar implementation.
//!
//! Minting a custodied key runs through the trusted authorization service
//! when it is reachable. The service either mints server-side and returns
//! the handle, or prepares a registry transaction for the caller's wallet to
//! sign; in the latter case it also returns the handle the registry will
//! record once the transaction confirms. When the service path fails and a
//! paying wallet is available, the registrar falls back to submitting the
//! registry mint transaction directly.
//!
//! All secret-bearing identity-provider interactions (the OAuth
//! code-for-token exchange in particular) happen behind the service
//! boundary; no client-side component ever holds a provider secret.

use async_trait::async_trait;
use entrust_core::{Error as ProtocolError, IdentityProof, KeyHandle, WalletSigner};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::chain::{ChainClient, TransactionRequest};
use crate::errors::Error;

/// The capability scopes a key can be minted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MintScope {
    /// The custodied key signs arbitrary payloads.
    SignAnything,
    /// The custodied key only signs personal messages.
    PersonalSignOnly,
}

/// An OAuth grant returned by the authorization service after it performs
/// the code-for-token exchange server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OauthGrant {
    /// The provider handle of the authenticated account.
    pub handle: String,
    /// The validated access token.
    pub access_token: String,
}

/// The authorization service's answer to a mint request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MintResponse {
    /// The service minted server-side.
    Minted {
        /// The handle of the newly-custodied key.
        key_handle: KeyHandle,
    },
    /// The service prepared a transaction the caller must sign and submit.
    Transaction {
        /// The unsigned registry transaction.
        tx: TransactionRequest,
        /// The handle the registry will record once the transaction confirms.
        pending: KeyHandle,
    },
}

/// The trusted authorization service boundary.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Mints (or prepares the minting of) a custodied key bound to the
    /// proof's identity.
    async fn mint(
        &self,
        proof: &IdentityProof,
        scopes: &[MintScope],
    ) -> Result<MintResponse, Error>;

    /// Looks up key handles already bound to the proof's identity, paginated.
    async fn lookup(
        &self,
        proof: &IdentityProof,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<KeyHandle>, Error>;

    /// Exchanges an OAuth authorization code for a validated grant.
    async fn exchange_oauth(&self, code: &str, redirect_uri: &str) -> Result<OauthGrant, Error>;
}

/// An [`AuthService`] client over HTTP.
pub struct HttpAuthService {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpAuthService {
    /// Given the service's base URL (with a trailing slash), returns a client.
    pub fn new(base_url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url.join(path).map_err(|err| {
            Error::Protocol(ProtocolError::Validation {
                field: "base_url".to_owned(),
                message: err.to_string(),
            })
        })
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, Error> {
        let response = self.http.post(self.endpoint(path)?).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::AuthService {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl AuthService for HttpAuthService {
    async fn mint(
        &self,
        proof: &IdentityProof,
        scopes: &[MintScope],
    ) -> Result<MintResponse, Error> {
        self.post_json("mint-with-auth", &json!({ "auth": proof, "scopes": scopes }))
            .await
    }

    async fn lookup(
        &self,
        proof: &IdentityProof,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<KeyHandle>, Error> {
        #[derive(Deserialize)]
        struct Page {
            key_handles: Vec<KeyHandle>,
        }
        let page: Page = self
            .post_json(
                "lookup",
                &json!({ "auth": proof, "limit": limit, "offset": offset }),
            )
            .await?;
        Ok(page.key_handles)
    }

    async fn exchange_oauth(&self, code: &str, redirect_uri: &str) -> Result<OauthGrant, Error> {
        self.post_json(
            "oauth/exchange",
            &json!({ "code": code, "redirect_uri": redirect_uri }),
        )
        .await
        .map_err(|err| match err {
            Error::AuthService { status, message } => Error::Protocol(
                ProtocolError::ExchangeFailed(format!("status {status}: {message}")),
            ),
            other => other,
        })
    }
}

/// Given an identity proof, mints through the authorization service, driving
/// the transaction continuation with the wallet when the service prepares one.
pub async fn mint_with_service(
    service: &dyn AuthService,
    chain: &dyn ChainClient,
    wallet: Option<&dyn WalletSigner>,
    proof: &IdentityProof,
    scopes: &[MintScope],
) -> Result<KeyHandle, Error> {
    match service.mint(proof, scopes).await? {
        MintResponse::Minted { key_handle } => Ok(key_handle),
        MintResponse::Transaction { tx, pending } => {
            let wallet = wallet.ok_or_else(|| {
                Error::Protocol(ProtocolError::Validation {
                    field: "wallet".to_owned(),
                    message: "the service prepared a transaction but no wallet can sign it"
                        .to_owned(),
                })
            })?;
            let signature = wallet.sign_transaction(&tx.signing_payload()?)?;
            let tx_hash = chain.submit(&tx, &signature).await?;
            tracing::debug!(%tx_hash, "registry mint transaction submitted");
            let receipt = chain.wait_for_confirmation(&tx_hash).await?;
            if !receipt.success {
                return Err(Error::Unconfirmed {
                    tx_hash: receipt.tx_hash,
                    reason: "registry mint transaction reverted".to_owned(),
                });
            }
            Ok(pending)
        }
    }
}

/// Mints by submitting the registry mint transaction directly from the wallet.
///
/// The wallet balance is checked up front, so an underfunded wallet fails
/// with the insufficient-funds category and remediation instructions rather
/// than a reverted transaction.
pub async fn mint_direct(
    chain: &dyn ChainClient,
    wallet: &dyn WalletSigner,
) -> Result<KeyHandle, Error> {
    let tx = chain.mint_transaction();
    let address = wallet.address();
    let balance = chain.balance(&address).await?;
    if balance < tx.value {
        return Err(Error::Protocol(ProtocolError::InsufficientFunds {
            remediation: format!(
                "fund {address} with at least {} base units, then retry the mint",
                tx.value - balance
            ),
        }));
    }
    let signature = wallet.sign_transaction(&tx.signing_payload()?)?;
    let tx_hash = chain.submit(&tx, &signature).await?;
    tracing::debug!(%tx_hash, "direct registry mint transaction submitted");
    let receipt = chain.wait_for_confirmation(&tx_hash).await?;
    if !receipt.success {
        return Err(Error::Unconfirmed {
            tx_hash: receipt.tx_hash,
            reason: "registry mint transaction reverted".to_owned(),
        });
    }
    chain.key_handle_from_receipt(&receipt).await
}

/// Mints through the authorization service, falling back to a direct registry
/// mint when the service path fails and a paying wallet is available.
///
/// A wallet rejection never triggers the fallback: re-asking the user to
/// sign through a different path is still the same declined request.
pub async fn mint(
    service: &dyn AuthService,
    chain: &dyn ChainClient,
    wallet: Option<&dyn WalletSigner>,
    proof: &IdentityProof,
    scopes: &[MintScope],
) -> Result<KeyHandle, Error> {
    match mint_with_service(service, chain, wallet, proof, scopes).await {
        Ok(key_handle) => Ok(key_handle),
        Err(err) if matches!(err.as_protocol(), Some(ProtocolError::UserRejected)) => Err(err),
        Err(err) => {
            let Some(wallet) = wallet else {
                return Err(err);
            };
            tracing::warn!(
                error = %err,
                "authorization service mint failed, falling back to a direct registry mint"
            );
            mint_direct(chain, wallet).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CustodyLedger, MockAuthService, MockChain, ServiceMode, MINT_COST};
    use entrust_core::test_utils::{example_statement_for, RejectingWallet};
    use entrust_core::LocalWallet;

    fn wallet_proof(wallet: &LocalWallet) -> IdentityProof {
        let statement = example_statement_for(wallet, vec!["entrust-sign://*".to_owned()]);
        IdentityProof::for_wallet(wallet, &statement).unwrap()
    }

    #[tokio::test]
    async fn service_mint_works() {
        let ledger = CustodyLedger::new();
        let service = MockAuthService::new(ledger.clone(), ServiceMode::Direct);
        let chain = MockChain::new(ledger.clone());
        let wallet = LocalWallet::random();
        let proof = wallet_proof(&wallet);

        let handle = mint(&service, &chain, Some(&wallet), &proof, &[MintScope::SignAnything])
            .await
            .unwrap();

        assert!(ledger.key_for(&handle).is_some());
        // The mint was recorded against the proof's identity.
        assert_eq!(service.lookup(&proof, 10, 0).await.unwrap(), vec![handle]);
    }

    #[tokio::test]
    async fn transaction_continuation_works() {
        let ledger = CustodyLedger::new();
        let service = MockAuthService::new(ledger.clone(), ServiceMode::Transaction);
        let chain = MockChain::new(ledger.clone());
        let wallet = LocalWallet::random();
        chain.fund(&wallet.address(), 2 * MINT_COST);
        let proof = wallet_proof(&wallet);

        let handle = mint(&service, &chain, Some(&wallet), &proof, &[MintScope::SignAnything])
            .await
            .unwrap();

        assert!(ledger.key_for(&handle).is_some());
        // The attached value was deducted from the paying wallet.
        assert_eq!(chain.balance(&wallet.address()).await.unwrap(), MINT_COST);
    }

    #[tokio::test]
    async fn outage_falls_back_to_direct_mint() {
        let ledger = CustodyLedger::new();
        let service = MockAuthService::new(ledger.clone(), ServiceMode::Outage);
        let chain = MockChain::new(ledger.clone());
        let wallet = LocalWallet::random();
        chain.fund(&wallet.address(), MINT_COST);
        let proof = wallet_proof(&wallet);

        let handle = mint(&service, &chain, Some(&wallet), &proof, &[MintScope::SignAnything])
            .await
            .unwrap();

        assert!(ledger.key_for(&handle).is_some());
    }

    #[tokio::test]
    async fn underfunded_fallback_reports_insufficient_funds() {
        let ledger = CustodyLedger::new();
        let service = MockAuthService::new(ledger.clone(), ServiceMode::Outage);
        let chain = MockChain::new(ledger.clone());
        let wallet = LocalWallet::random();
        let proof = wallet_proof(&wallet);

        let result = mint(&service, &chain, Some(&wallet), &proof, &[MintScope::SignAnything]).await;

        let Err(err) = result else {
            panic!("expected the fallback to fail");
        };
        assert!(matches!(
            err.as_protocol(),
            Some(ProtocolError::InsufficientFunds { remediation })
                if remediation.contains(&wallet.address().to_lower_hex())
        ));
    }

    #[tokio::test]
    async fn outage_without_a_wallet_surfaces_the_service_error() {
        let ledger = CustodyLedger::new();
        let service = MockAuthService::new(ledger.clone(), ServiceMode::Outage);
        let chain = MockChain::new(ledger);
        let proof = IdentityProof::for_oauth("@creator", "token-123");

        let result = mint(&service, &chain, None, &proof, &[MintScope::SignAnything]).await;

        assert!(matches!(
            result,
            Err(Error::AuthService { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn rejected_continuation_does_not_fall_back() {
        let ledger = CustodyLedger::new();
        let service = MockAuthService::new(ledger.clone(), ServiceMode::Transaction);
        let chain = MockChain::new(ledger.clone());
        let wallet = RejectingWallet::default();
        let proof = IdentityProof::for_oauth("@creator", "token-123");

        let result = mint(&service, &chain, Some(&wallet), &proof, &[MintScope::SignAnything]).await;

        assert!(matches!(
            result.map_err(|err| err.as_protocol().cloned()),
            Err(Some(ProtocolError::UserRejected))
        ));
        // The ledger only holds the service-side pending key, no fallback mint.
        assert_eq!(ledger.len(), 1);
    }
}
