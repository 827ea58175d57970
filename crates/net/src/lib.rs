//! Network adapters for the auth-context delegation handshake: the trusted
//! authorization-service boundary ([`registrar`]), the chain client for
//! direct registry mints ([`chain`]), the quorum client for the distributed
//! signer network ([`client`]) and the orchestrator that runs a full
//! handshake end to end ([`handshake`]).

pub use self::{
    chain::{ChainClient, TransactionRequest, TxReceipt},
    client::{Connection, NetworkClient},
    errors::Error,
    handshake::{exchange_oauth_code, AuthStrategy, Handshake},
    node::{CodeSource, Execution, SignerNode},
    registrar::{AuthService, HttpAuthService, MintResponse, MintScope, OauthGrant},
};

pub mod chain;
pub mod client;
mod errors;
pub mod handshake;
pub mod node;
pub mod registrar;
#[cfg(any(test, feature = "dev"))]
pub mod testing;
