//! Chain client abstraction for direct custody-registry interactions.
//!
//! The registrar only needs a narrow slice of chain functionality: read a
//! balance, sign and submit the registry mint transaction, wait for its
//! confirmation and read the minted key handle back out of the receipt.
//! Everything else about the chain stays behind this trait.

use async_trait::async_trait;
use entrust_core::crypto::{Address, WalletSignature};
use entrust_core::{Error as ProtocolError, KeyHandle};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// An unsigned transaction request against the custody-registry chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// The recipient contract address, `0x`-prefixed hex.
    pub to: String,
    /// The native value attached to the call, in base units.
    pub value: u128,
    /// The call data, `0x`-prefixed hex.
    pub data: String,
    /// The gas limit, if the preparer pinned one.
    pub gas: Option<u64>,
}

impl TransactionRequest {
    /// Returns the canonical signing payload for the request.
    ///
    /// Wallets sign this via their transaction path; the chain client
    /// recovers the sender from the same bytes.
    pub fn signing_payload(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self)
            .map_err(|err| Error::Protocol(ProtocolError::Serialization(err.to_string())))
    }
}

/// A receipt for a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// The confirmed transaction hash.
    pub tx_hash: String,
    /// The block the transaction was included in.
    pub block_number: u64,
    /// Whether the transaction executed without reverting.
    pub success: bool,
}

/// A minimal client for the chain hosting the custody registry.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Returns the native balance of an address, in base units.
    async fn balance(&self, address: &Address) -> Result<u128, Error>;

    /// Returns the unsigned registry mint transaction, with the mint cost as
    /// its attached value.
    fn mint_transaction(&self) -> TransactionRequest;

    /// Submits a signed transaction and returns its hash.
    async fn submit(
        &self,
        tx: &TransactionRequest,
        signature: &WalletSignature,
    ) -> Result<String, Error>;

    /// Waits until the transaction is included and returns its receipt.
    async fn wait_for_confirmation(&self, tx_hash: &str) -> Result<TxReceipt, Error>;

    /// Extracts the minted key handle from a registry mint receipt.
    async fn key_handle_from_receipt(&self, receipt: &TxReceipt) -> Result<KeyHandle, Error>;
}
