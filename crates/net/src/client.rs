//! Signer network client implementation.
//!
//! The client wraps the node set behind an explicit connection guard and
//! runs each operation as a quorum round: the request goes out node by node,
//! a deterministic rejection from any node ends the round immediately (every
//! honest node would answer it identically), node-local failures are
//! tolerated, and the round succeeds once the configured threshold of
//! identical answers is collected.

use std::sync::Arc;

use chrono::Utc;
use entrust_core::crypto::WalletSignature;
use entrust_core::AuthContext;

use crate::errors::Error;
use crate::node::{CodeSource, Execution, SignerNode};

/// A client for the distributed signer network.
pub struct NetworkClient {
    nodes: Vec<Arc<dyn SignerNode>>,
    threshold: usize,
}

impl NetworkClient {
    /// Given the node set and the number of identical answers an operation
    /// requires, returns a client, or an `Err` result for a threshold
    /// outside `1..=nodes.len()`.
    pub fn new(nodes: Vec<Arc<dyn SignerNode>>, threshold: usize) -> Result<Self, Error> {
        if threshold == 0 || threshold > nodes.len() {
            return Err(Error::Protocol(entrust_core::Error::Validation {
                field: "threshold".to_owned(),
                message: format!("must be between 1 and {}", nodes.len()),
            }));
        }
        Ok(Self { nodes, threshold })
    }

    /// Returns the configured threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Opens a connection for a batch of operations; the returned guard
    /// releases the connection when it is dropped.
    pub fn connect(&self) -> Connection<'_> {
        tracing::debug!(nodes = self.nodes.len(), "signer network connection acquired");
        Connection { client: self }
    }
}

/// A live connection to the signer network.
pub struct Connection<'a> {
    client: &'a NetworkClient,
}

impl Drop for Connection<'_> {
    fn drop(&mut self) {
        tracing::debug!("signer network connection released");
    }
}

impl Connection<'_> {
    /// Requests a fresh delegation nonce, trying nodes in order until one
    /// answers.
    pub async fn fresh_nonce(&self) -> Result<String, Error> {
        let mut last = None;
        for node in &self.client.nodes {
            match node.fresh_nonce().await {
                Ok(nonce) => return Ok(nonce),
                Err(err) => {
                    tracing::debug!(node = node.id(), error = %err, "nonce request failed");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or(Error::QuorumNotReached {
            successes: 0,
            required: 1,
        }))
    }

    /// Runs a signing round over the payload's Keccak-256 digest.
    ///
    /// The context's expiration is checked locally first; an expired context
    /// never reaches a node. Signatures are deterministic, so the threshold
    /// answers must agree byte for byte.
    pub async fn sign(
        &self,
        context: &AuthContext,
        payload: &[u8],
    ) -> Result<WalletSignature, Error> {
        context.scope.check_fresh(Utc::now())?;

        let mut answers: Vec<WalletSignature> = Vec::new();
        for node in &self.client.nodes {
            match node.sign(context, payload).await {
                Ok(signature) => answers.push(signature),
                Err(err) if err.is_deterministic_rejection() => {
                    tracing::debug!(node = node.id(), error = %err, "signing request rejected");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(node = node.id(), error = %err, "signing request failed");
                }
            }
            if answers.len() >= self.client.threshold {
                break;
            }
        }

        if answers.len() < self.client.threshold {
            return Err(Error::QuorumNotReached {
                successes: answers.len(),
                required: self.client.threshold,
            });
        }
        if answers.iter().any(|answer| answer != &answers[0]) {
            return Err(Error::QuorumMismatch);
        }
        Ok(answers.swap_remove(0))
    }

    /// Runs an execution round.
    ///
    /// Agreement is checked on the response value only; captured logs are
    /// node-local and the first answering node's are returned.
    pub async fn execute(
        &self,
        context: &AuthContext,
        code: &CodeSource,
        params: &serde_json::Value,
    ) -> Result<Execution, Error> {
        context.scope.check_fresh(Utc::now())?;

        let mut answers: Vec<Execution> = Vec::new();
        for node in &self.client.nodes {
            match node.execute(context, code, params).await {
                Ok(execution) => answers.push(execution),
                Err(err) if err.is_deterministic_rejection() => {
                    tracing::debug!(node = node.id(), error = %err, "execution request rejected");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(node = node.id(), error = %err, "execution request failed");
                }
            }
            if answers.len() >= self.client.threshold {
                break;
            }
        }

        if answers.len() < self.client.threshold {
            return Err(Error::QuorumNotReached {
                successes: answers.len(),
                required: self.client.threshold,
            });
        }
        if answers.iter().any(|answer| answer.response != answers[0].response) {
            return Err(Error::QuorumMismatch);
        }
        Ok(answers.swap_remove(0))
    }
}
