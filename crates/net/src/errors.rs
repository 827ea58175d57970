//! Types and abstractions for errors in network operations.

use entrust_core::Error as ProtocolError;

/// An error in a registrar, chain or signer-network operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A protocol-level failure surfaced by the core handshake logic.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A transport failure talking to the authorization service.
    #[error("authorization service transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// A non-success response from the authorization service.
    #[error("authorization service returned status {status}: {message}")]
    AuthService {
        /// The HTTP status code.
        status: u16,
        /// The response body, verbatim.
        message: String,
    },

    /// A chain interaction failure.
    #[error("chain interaction failed: {0}")]
    Chain(String),

    /// A submitted transaction that never confirmed successfully.
    #[error("transaction {tx_hash} did not confirm: {reason}")]
    Unconfirmed {
        /// The submitted transaction hash.
        tx_hash: String,
        /// Why confirmation failed.
        reason: String,
    },

    /// Fewer nodes than the signing threshold produced a usable answer.
    #[error("quorum not reached: {successes} of {required} required answers")]
    QuorumNotReached {
        /// Nodes that answered successfully.
        successes: usize,
        /// The configured threshold.
        required: usize,
    },

    /// Nodes reached the threshold but disagreed on the result.
    #[error("signer nodes disagreed on the result")]
    QuorumMismatch,
}

impl Error {
    /// Returns the underlying protocol error, if there is one.
    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            Error::Protocol(err) => Some(err),
            _ => None,
        }
    }

    /// Returns whether every honest node would answer this request with the
    /// same rejection.
    ///
    /// Capability, validation, expiry and evidence failures are verdicts on
    /// the request itself, so the first one ends the quorum round; transport
    /// and availability failures are node-local and the round continues.
    pub fn is_deterministic_rejection(&self) -> bool {
        matches!(
            self.as_protocol(),
            Some(
                ProtocolError::CapabilityNotFound { .. }
                    | ProtocolError::Validation { .. }
                    | ProtocolError::Expired(_)
                    | ProtocolError::ExpirationInPast { .. }
                    | ProtocolError::UserRejected
                    | ProtocolError::MalformedStatement(_)
                    | ProtocolError::Crypto(_)
            )
        )
    }
}
