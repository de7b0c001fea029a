//! The agent's signing key.

use alloy::consensus::TxLegacy;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Signature};
use alloy::signers::local::PrivateKeySigner;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("invalid private key")]
    InvalidKey,
    #[error("failed to sign transaction: {0}")]
    Sign(String),
}

/// Owns the private key. Only the address is ever displayed.
pub struct AgentSigner {
    inner: PrivateKeySigner,
}

impl AgentSigner {
    /// Parse a hex private key, with or without `0x`.
    pub fn from_hex(key: &str) -> Result<Self, SignerError> {
        // The parse error can echo input; never surface it.
        let inner = key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|_| SignerError::InvalidKey)?;
        Ok(Self { inner })
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// EIP-155 signature over chain id, nonce, gas price, destination and input.
    pub fn sign_legacy(&self, tx: &mut TxLegacy) -> Result<Signature, SignerError> {
        self.inner
            .sign_transaction_sync(tx)
            .map_err(|e| SignerError::Sign(e.to_string()))
    }
}

impl fmt::Debug for AgentSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
