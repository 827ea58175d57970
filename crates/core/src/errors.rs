//! Types and abstractions for protocol errors.
//!
//! Every failure is surfaced to the initiating caller and the flow halts at
//! the failing stage; there are no automatic retries anywhere in the
//! handshake. Artifacts produced by earlier stages (identity proofs, key
//! handles) stay intact so a later stage can be retried on its own.

use chrono::{DateTime, Utc};

/// A protocol error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The wallet declined to sign a statement or transaction.
    ///
    /// Non-retryable; reported as informational.
    #[error("signature request rejected by the wallet")]
    UserRejected,

    /// The paying wallet cannot cover the cost of an on-chain operation.
    #[error("insufficient funds: {remediation}")]
    InsufficientFunds {
        /// Instructions for funding the wallet before retrying.
        remediation: String,
    },

    /// The verifier found no delegated capability covering the requested resource.
    ///
    /// This is the distinct authorization category a capability URI scheme
    /// mismatch produces: the delegation was signed over one scheme while the
    /// verifier checks another, so every request fails here and nowhere else.
    #[error("no delegated capability found for `{resource}`")]
    CapabilityNotFound {
        /// The capability URI the verifier looked for.
        resource: String,
    },

    /// A request parameter failed validation.
    #[error("invalid parameter `{field}`: {message}")]
    Validation {
        /// Path of the offending field.
        field: String,
        /// The verbatim validation failure.
        message: String,
    },

    /// The bound delegation has expired.
    #[error("authorization expired at {0}")]
    Expired(DateTime<Utc>),

    /// An expiration that is not strictly in the future at construction time.
    #[error("expiration {expiration} is not in the future (now: {now})")]
    ExpirationInPast {
        /// The rejected expiration timestamp.
        expiration: DateTime<Utc>,
        /// The clock value the expiration was checked against.
        now: DateTime<Utc>,
    },

    /// A token exchange with an external identity provider failed.
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    /// A transient network failure; the caller decides whether to retry.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// A malformed sign-in statement.
    #[error("malformed sign-in statement: {0}")]
    MalformedStatement(String),

    /// A serialization or deserialization failure (e.g. a corrupt session record).
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// A cryptography error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// A cryptography error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// A signature that fails verification or recovery.
    #[error("invalid signature")]
    InvalidSignature,

    /// A public key that cannot be deserialized.
    #[error("invalid verifying key")]
    InvalidVerifyingKey,

    /// A recovery id outside the accepted range.
    #[error("invalid recovery id")]
    InvalidRecoveryId,

    /// A signature with an invalid length or encoding.
    #[error("malformed signature")]
    MalformedSignature,

    /// An address with an invalid length or encoding.
    #[error("malformed address")]
    MalformedAddress,

    /// An authenticated decryption failure (wrong key or tampered ciphertext).
    #[error("decryption failed")]
    DecryptionFailed,
}
