//! Chain access used by the agent core.
//!
//! `ChainClient` is the full set of JSON-RPC capabilities the poll loop and the
//! transaction submitter need. `RpcChainClient` implements it over an alloy HTTP
//! provider; tests implement it with in-memory fakes.
//!
//! No call here retries. Retry policy lives in the submitter and the poll loop.

pub mod rpc;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use rpc::RpcChainClient;

/// A log entry as returned by `eth_getLogs`, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: Option<B256>,
    pub topics: Vec<B256>,
    pub data: Bytes,
    /// Set by the node when the log was reorged out.
    pub removed: bool,
}

impl RawLog {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }
}

/// Inclusion record for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    /// `true` when the transaction executed successfully (status 1).
    pub success: bool,
    pub gas_used: u64,
}

/// Why the node refused a raw transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionKind {
    NonceTooLow,
    Underpriced,
    /// The identical transaction is already in the node's pool.
    AlreadyKnown,
    Other(String),
}

impl RejectionKind {
    /// Classify a JSON-RPC error message from `eth_sendRawTransaction`.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("nonce too low") || lower.contains("nonce is too low") {
            Self::NonceTooLow
        } else if lower.contains("underpriced")
            || lower.contains("fee too low")
            || lower.contains("gas price too low")
            || lower.contains("premium too low")
        {
            Self::Underpriced
        } else if lower.contains("already known") || lower.contains("already imported") {
            Self::AlreadyKnown
        } else {
            Self::Other(message.to_string())
        }
    }

    /// Whether a fresh nonce / gas snapshot can fix the rejection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NonceTooLow | Self::Underpriced)
    }
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonceTooLow => write!(f, "nonce too low"),
            Self::Underpriced => write!(f, "underpriced"),
            Self::AlreadyKnown => write!(f, "already known"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Node unreachable, transport failure, or an RPC error response.
    #[error("network: {0}")]
    Network(String),
    #[error("rejected: {0}")]
    Rejected(RejectionKind),
    #[error("no receipt for {tx_hash} after {timeout:?}")]
    ReceiptTimeout { tx_hash: B256, timeout: Duration },
}

/// JSON-RPC capabilities required by the agent, independent of transport.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainError>;

    async fn current_height(&self) -> Result<u64, ChainError>;

    /// Logs emitted by `address` in `[from_block, to_block]` whose first topic is `topic0`.
    async fn get_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
        topic0: B256,
    ) -> Result<Vec<RawLog>, ChainError>;

    /// Next usable transaction count for `address`, pending transactions included.
    async fn nonce_for(&self, address: Address) -> Result<u64, ChainError>;

    /// Suggested gas price in wei.
    async fn gas_price(&self) -> Result<u128, ChainError>;

    async fn send_signed(&self, raw_tx: &[u8]) -> Result<B256, ChainError>;

    async fn wait_for_receipt(&self, tx_hash: B256, timeout: Duration) -> Result<Receipt, ChainError>;

    /// Read-only `eth_call` against the latest block.
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, ChainError>;
}
