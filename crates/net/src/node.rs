//! Signer node abstraction.

use async_trait::async_trait;
use entrust_core::crypto::WalletSignature;
use entrust_core::AuthContext;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// The source of remote code submitted for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CodeSource {
    /// Code submitted inline with the request.
    Inline {
        /// The source text.
        source: String,
    },
    /// Code addressed by its content identifier in distributed storage.
    Reference {
        /// The content identifier.
        cid: String,
    },
}

impl CodeSource {
    /// Returns the resource identifier the execution capability must cover.
    ///
    /// Inline code has no stable identifier, so only a wildcard execution
    /// delegation covers it.
    pub fn resource_id(&self) -> &str {
        match self {
            CodeSource::Inline { .. } => "*",
            CodeSource::Reference { cid } => cid,
        }
    }
}

/// The result of a remote execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    /// The value the executed code responded with.
    pub response: serde_json::Value,
    /// Console output captured during execution, in emission order.
    pub logs: Vec<String>,
}

/// A single node of the distributed signer network.
///
/// Every operation verifies the presented auth context before cooperating;
/// a node never signs or executes on the strength of the caller's word.
#[async_trait]
pub trait SignerNode: Send + Sync {
    /// Returns the node's stable identifier.
    fn id(&self) -> &str;

    /// Returns a fresh nonce for an interactive delegation.
    async fn fresh_nonce(&self) -> Result<String, Error>;

    /// Verifies the context and returns this node's signature over the
    /// payload's Keccak-256 digest.
    async fn sign(&self, context: &AuthContext, payload: &[u8])
        -> Result<WalletSignature, Error>;

    /// Verifies the context and executes the code with the given parameters,
    /// with the custodied key available to it.
    async fn execute(
        &self,
        context: &AuthContext,
        code: &CodeSource,
        params: &serde_json::Value,
    ) -> Result<Execution, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_works() {
        let inline = CodeSource::Inline {
            source: "respond({ ok: true })".to_owned(),
        };
        assert_eq!(inline.resource_id(), "*");

        let referenced = CodeSource::Reference {
            cid: "QmValidation".to_owned(),
        };
        assert_eq!(referenced.resource_id(), "QmValidation");
    }
}
