//! Core protocol logic for the Entrust auth-context delegation handshake: the sequence of
//! steps a distributed signer network requires before it will cooperate to produce a
//! signature or execute remote code with a custodied key on a user's behalf.
//!
//! The handshake runs in four stages, each stage's output being the next stage's required
//! input: an identity proof ([`identity`]), a custodied key handle ([`key_handle`]), a
//! scoped capability delegation ([`scope`], [`delegation`]) and finally the auth context
//! presented to the network. Durable artifacts persist across sessions through the
//! single-slot [`session`] vault.

pub use self::{
    delegation::{AuthContext, SignedDelegation},
    errors::{CryptoError, Error},
    identity::{AuthMethod, IdentityProof, LocalWallet, ProofPayload, WalletProof, WalletSigner},
    key_handle::KeyHandle,
    scope::{CapabilityKind, DelegationScope, Resource, SchemeSet},
    session::{MemorySessionStore, ResumedSession, SessionStore, SessionVault, Slot},
    statement::SignInStatement,
};

pub mod crypto;
pub mod delegation;
mod errors;
pub mod identity;
pub mod key_handle;
pub mod scope;
pub mod session;
pub mod statement;
#[cfg(any(test, feature = "dev"))]
pub mod test_utils;
