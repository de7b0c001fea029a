//! `ChainClient` over an alloy HTTP provider.

use super::{ChainClient, ChainError, RawLog, Receipt, RejectionKind};

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::transports::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

pub struct RpcChainClient {
    provider: RootProvider,
    receipt_poll_interval: Duration,
}

impl RpcChainClient {
    pub fn connect_http(rpc_url: &str, receipt_poll_interval: Duration) -> Result<Self, ChainError> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::Network(format!("invalid rpc url {rpc_url}: {e}")))?;
        Ok(Self {
            provider: RootProvider::new_http(url),
            receipt_poll_interval,
        })
    }
}

fn network(e: TransportError) -> ChainError {
    ChainError::Network(e.to_string())
}

/// Error responses from `eth_sendRawTransaction` are node rejections; anything
/// else is a transport problem.
fn send_error(e: TransportError) -> ChainError {
    match e.as_error_resp() {
        Some(payload) => ChainError::Rejected(RejectionKind::from_message(&payload.message)),
        None => network(e),
    }
}

fn to_raw_log(log: Log) -> Option<RawLog> {
    let (Some(block_number), Some(log_index)) = (log.block_number, log.log_index) else {
        warn!(tx = ?log.transaction_hash, "dropping log without block number or log index");
        return None;
    };
    Some(RawLog {
        address: log.address(),
        block_number,
        log_index,
        tx_hash: log.transaction_hash,
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        removed: log.removed,
    })
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.provider.get_chain_id().await.map_err(network)
    }

    async fn current_height(&self) -> Result<u64, ChainError> {
        self.provider.get_block_number().await.map_err(network)
    }

    async fn get_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
        topic0: B256,
    ) -> Result<Vec<RawLog>, ChainError> {
        let filter = Filter::new()
            .address(address)
            .event_signature(topic0)
            .from_block(from_block)
            .to_block(to_block);
        let logs = self.provider.get_logs(&filter).await.map_err(network)?;
        Ok(logs.into_iter().filter_map(to_raw_log).collect())
    }

    async fn nonce_for(&self, address: Address) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(network)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.provider.get_gas_price().await.map_err(network)
    }

    async fn send_signed(&self, raw_tx: &[u8]) -> Result<B256, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(raw_tx)
            .await
            .map_err(send_error)?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx_hash: B256, timeout: Duration) -> Result<Receipt, ChainError> {
        let poll = async {
            loop {
                if let Some(receipt) = self
                    .provider
                    .get_transaction_receipt(tx_hash)
                    .await
                    .map_err(network)?
                {
                    return Ok::<_, ChainError>(Receipt {
                        tx_hash,
                        block_number: receipt.block_number,
                        success: receipt.status(),
                        gas_used: receipt.gas_used,
                    });
                }
                debug!(tx = %tx_hash, "receipt not available yet");
                tokio::time::sleep(self.receipt_poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::ReceiptTimeout { tx_hash, timeout }),
        }
    }

    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, ChainError> {
        let request = TransactionRequest::default().with_to(to).with_input(input);
        self.provider.call(request).await.map_err(network)
    }
}
