//! Utilities for testing.
//!
//! An in-process rendition of the deployment: a set of signer nodes sharing
//! a custody ledger with a mock chain and a mock authorization service,
//! wired together the way the real components are.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use entrust_core::crypto::{self, Address, SigningKey, WalletSignature};
use entrust_core::{
    delegation, AuthContext, CapabilityKind, Error as ProtocolError, IdentityProof, KeyHandle,
    SchemeSet,
};

use crate::chain::{ChainClient, TransactionRequest, TxReceipt};
use crate::client::NetworkClient;
use crate::errors::Error;
use crate::node::{CodeSource, Execution, SignerNode};
use crate::registrar::{AuthService, MintResponse, MintScope, OauthGrant};

/// The mock custody-registry contract address.
pub const REGISTRY_ADDRESS: &str = "0x00000000000000000000000000000000000e4272";
/// The mint cost in base units.
pub const MINT_COST: u128 = 1_000_000;

/// Call data marking a direct registry mint.
const DIRECT_MINT_DATA: &str = "0x6d696e74";
/// Call data marking a service-prepared mint, already recorded by the service.
const SERVICE_MINT_DATA: &str = "0x7376632d6d696e74";

/// The shared record of custodied keys, standing in for the network's
/// distributed key shares.
#[derive(Default)]
pub struct CustodyLedger {
    keys: Mutex<HashMap<String, SigningKey>>,
}

impl CustodyLedger {
    /// Returns a fresh shared ledger.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Generates and custodies a fresh key pair, returning its handle.
    pub fn mint(&self) -> KeyHandle {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let handle = KeyHandle::new(
            signing_key
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            crypto::random_mod(),
        );
        self.keys
            .lock()
            .expect("ledger lock is never poisoned")
            .insert(handle.token_id_hex(), signing_key);
        handle
    }

    /// Returns the signing key custodied under a handle, if any.
    pub fn key_for(&self, handle: &KeyHandle) -> Option<SigningKey> {
        self.keys
            .lock()
            .expect("ledger lock is never poisoned")
            .get(&handle.token_id_hex())
            .cloned()
    }

    /// Returns the number of custodied keys.
    pub fn len(&self) -> usize {
        self.keys.lock().expect("ledger lock is never poisoned").len()
    }

    /// Returns whether the ledger holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A signer node holding the custody ledger in process.
pub struct LocalNode {
    id: String,
    ledger: Arc<CustodyLedger>,
    schemes: SchemeSet,
}

impl LocalNode {
    /// Returns a node over the shared ledger, verifying against the given
    /// scheme set.
    pub fn new(id: impl Into<String>, ledger: Arc<CustodyLedger>, schemes: SchemeSet) -> Self {
        Self {
            id: id.into(),
            ledger,
            schemes,
        }
    }

    fn custodied_key(&self, context: &AuthContext) -> Result<SigningKey, Error> {
        self.ledger.key_for(&context.key_handle).ok_or_else(|| {
            Error::Protocol(ProtocolError::Validation {
                field: "key_handle.token_id".to_owned(),
                message: "no key custodied under this token".to_owned(),
            })
        })
    }
}

#[async_trait]
impl SignerNode for LocalNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fresh_nonce(&self) -> Result<String, Error> {
        Ok(crypto::random_nonce())
    }

    async fn sign(
        &self,
        context: &AuthContext,
        payload: &[u8],
    ) -> Result<WalletSignature, Error> {
        delegation::verify(context, CapabilityKind::Signing, "*", &self.schemes, Utc::now())?;
        let key = self.custodied_key(context)?;
        Ok(crypto::sign_prehash(&key, &crypto::keccak256(payload)))
    }

    async fn execute(
        &self,
        context: &AuthContext,
        code: &CodeSource,
        params: &serde_json::Value,
    ) -> Result<Execution, Error> {
        delegation::verify(
            context,
            CapabilityKind::Execution,
            code.resource_id(),
            &self.schemes,
            Utc::now(),
        )?;
        if !params.is_object() {
            return Err(Error::Protocol(ProtocolError::Validation {
                field: "params".to_owned(),
                message: "expected a JSON object".to_owned(),
            }));
        }
        let key = self.custodied_key(context)?;
        Ok(Execution {
            response: serde_json::json!({
                "ok": true,
                "resource": code.resource_id(),
                "signer": crypto::address_of(key.verifying_key()).to_lower_hex(),
                "params": params,
            }),
            logs: vec![format!("executed {}", code.resource_id())],
        })
    }
}

/// A node that fails every request with a transient error.
pub struct UnreachableNode {
    id: String,
}

impl UnreachableNode {
    /// Returns an unreachable node with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    fn unreachable(&self) -> Error {
        Error::Protocol(ProtocolError::Transient(format!(
            "{} is unreachable",
            self.id
        )))
    }
}

#[async_trait]
impl SignerNode for UnreachableNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fresh_nonce(&self) -> Result<String, Error> {
        Err(self.unreachable())
    }

    async fn sign(
        &self,
        _context: &AuthContext,
        _payload: &[u8],
    ) -> Result<WalletSignature, Error> {
        Err(self.unreachable())
    }

    async fn execute(
        &self,
        _context: &AuthContext,
        _code: &CodeSource,
        _params: &serde_json::Value,
    ) -> Result<Execution, Error> {
        Err(self.unreachable())
    }
}

/// Returns a network client over `count` in-process nodes sharing a ledger.
pub fn local_network(
    count: usize,
    threshold: usize,
    ledger: &Arc<CustodyLedger>,
    schemes: &SchemeSet,
) -> NetworkClient {
    let nodes = (0..count)
        .map(|index| {
            Arc::new(LocalNode::new(
                format!("node-{index}"),
                Arc::clone(ledger),
                schemes.clone(),
            )) as Arc<dyn SignerNode>
        })
        .collect();
    NetworkClient::new(nodes, threshold).expect("threshold is within the node count")
}

/// An in-process chain hosting the custody registry.
pub struct MockChain {
    ledger: Arc<CustodyLedger>,
    balances: Mutex<HashMap<String, u128>>,
    pending_mints: Mutex<HashMap<String, KeyHandle>>,
}

impl MockChain {
    /// Returns a chain over the shared ledger with no funded accounts.
    pub fn new(ledger: Arc<CustodyLedger>) -> Self {
        Self {
            ledger,
            balances: Mutex::new(HashMap::new()),
            pending_mints: Mutex::new(HashMap::new()),
        }
    }

    /// Credits an address with native balance.
    pub fn fund(&self, address: &Address, amount: u128) {
        *self
            .balances
            .lock()
            .expect("balances lock is never poisoned")
            .entry(address.to_lower_hex())
            .or_default() += amount;
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn balance(&self, address: &Address) -> Result<u128, Error> {
        Ok(self
            .balances
            .lock()
            .expect("balances lock is never poisoned")
            .get(&address.to_lower_hex())
            .copied()
            .unwrap_or(0))
    }

    fn mint_transaction(&self) -> TransactionRequest {
        TransactionRequest {
            to: REGISTRY_ADDRESS.to_owned(),
            value: MINT_COST,
            data: DIRECT_MINT_DATA.to_owned(),
            gas: None,
        }
    }

    async fn submit(
        &self,
        tx: &TransactionRequest,
        signature: &WalletSignature,
    ) -> Result<String, Error> {
        let payload = tx.signing_payload()?;
        let digest = crypto::keccak256(&payload);
        let sender = crypto::recover_address_from_prehash(&digest, signature)
            .map_err(|err| Error::Chain(err.to_string()))?;

        {
            let mut balances = self
                .balances
                .lock()
                .expect("balances lock is never poisoned");
            let balance = balances.entry(sender.to_lower_hex()).or_default();
            if *balance < tx.value {
                return Err(Error::Chain(format!(
                    "sender {sender} cannot cover the attached value"
                )));
            }
            *balance -= tx.value;
        }

        let tx_hash = format!(
            "0x{}",
            hex::encode(crypto::keccak256(
                &[payload.as_slice(), &signature.0].concat()
            ))
        );
        if tx.data == DIRECT_MINT_DATA {
            let handle = self.ledger.mint();
            self.pending_mints
                .lock()
                .expect("pending mints lock is never poisoned")
                .insert(tx_hash.clone(), handle);
        }
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: &str) -> Result<TxReceipt, Error> {
        Ok(TxReceipt {
            tx_hash: tx_hash.to_owned(),
            block_number: 1,
            success: true,
        })
    }

    async fn key_handle_from_receipt(&self, receipt: &TxReceipt) -> Result<KeyHandle, Error> {
        self.pending_mints
            .lock()
            .expect("pending mints lock is never poisoned")
            .get(&receipt.tx_hash)
            .cloned()
            .ok_or_else(|| Error::Chain("receipt carries no registry mint event".to_owned()))
    }
}

/// How the mock authorization service answers mint requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    /// Mints server-side and returns the handle directly.
    Direct,
    /// Prepares a transaction continuation for the caller to sign.
    Transaction,
    /// Answers every request with a service failure.
    Outage,
}

/// An in-process authorization service over the shared ledger.
pub struct MockAuthService {
    ledger: Arc<CustodyLedger>,
    mode: Mutex<ServiceMode>,
    minted: Mutex<HashMap<String, Vec<KeyHandle>>>,
}

impl MockAuthService {
    /// Returns a service over the shared ledger in the given mode.
    pub fn new(ledger: Arc<CustodyLedger>, mode: ServiceMode) -> Self {
        Self {
            ledger,
            mode: Mutex::new(mode),
            minted: Mutex::new(HashMap::new()),
        }
    }

    /// Switches the service's answering mode.
    pub fn set_mode(&self, mode: ServiceMode) {
        *self.mode.lock().expect("mode lock is never poisoned") = mode;
    }

    fn mode(&self) -> ServiceMode {
        *self.mode.lock().expect("mode lock is never poisoned")
    }

    fn record(&self, method_id: &str, handle: &KeyHandle) {
        self.minted
            .lock()
            .expect("minted lock is never poisoned")
            .entry(method_id.to_owned())
            .or_default()
            .push(handle.clone());
    }
}

#[async_trait]
impl AuthService for MockAuthService {
    async fn mint(
        &self,
        proof: &IdentityProof,
        _scopes: &[MintScope],
    ) -> Result<MintResponse, Error> {
        match self.mode() {
            ServiceMode::Outage => Err(Error::AuthService {
                status: 503,
                message: "service unavailable".to_owned(),
            }),
            ServiceMode::Direct => {
                let key_handle = self.ledger.mint();
                self.record(&proof.method_id, &key_handle);
                Ok(MintResponse::Minted { key_handle })
            }
            ServiceMode::Transaction => {
                let pending = self.ledger.mint();
                self.record(&proof.method_id, &pending);
                Ok(MintResponse::Transaction {
                    tx: TransactionRequest {
                        to: REGISTRY_ADDRESS.to_owned(),
                        value: MINT_COST,
                        data: SERVICE_MINT_DATA.to_owned(),
                        gas: Some(150_000),
                    },
                    pending,
                })
            }
        }
    }

    async fn lookup(
        &self,
        proof: &IdentityProof,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<KeyHandle>, Error> {
        if self.mode() == ServiceMode::Outage {
            return Err(Error::AuthService {
                status: 503,
                message: "service unavailable".to_owned(),
            });
        }
        Ok(self
            .minted
            .lock()
            .expect("minted lock is never poisoned")
            .get(&proof.method_id)
            .map(|handles| handles.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn exchange_oauth(&self, code: &str, _redirect_uri: &str) -> Result<OauthGrant, Error> {
        if self.mode() == ServiceMode::Outage {
            return Err(Error::Protocol(ProtocolError::ExchangeFailed(
                "authorization service unavailable".to_owned(),
            )));
        }
        if code.is_empty() {
            return Err(Error::Protocol(ProtocolError::ExchangeFailed(
                "empty authorization code".to_owned(),
            )));
        }
        Ok(OauthGrant {
            handle: "@custodian-user".to_owned(),
            access_token: format!("mock-token-{code}"),
        })
    }
}
