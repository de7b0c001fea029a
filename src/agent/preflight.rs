//! Startup checks against the node before the loop starts.
//!
//! Node reads retry on a fixed interval so an agent started alongside its
//! node does not exit while the node is still coming up.

use crate::chain::{ChainClient, ChainError};
use crate::config::{Config, ConfigError};
use crate::onchain::abi::IDataMarketplace;
use crate::onchain::EventRegistry;

use alloy::primitives::{Address, Bytes};
use alloy::sol_types::{SolCall, SolValue};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Node reads attempted before startup gives up.
pub const STARTUP_ATTEMPTS: u32 = 10;

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("node unreachable after {attempts} attempts: {last}")]
    Unreachable { attempts: u32, last: ChainError },
    #[error("chain id mismatch: configured {expected}, node reports {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },
    #[error("topic hash mismatch for {0}")]
    TopicMismatch(String),
}

#[derive(Debug, Clone)]
pub struct PreflightSettings {
    pub chain_id: u64,
    pub contract: Address,
    pub agent: Address,
    pub attempts: u32,
    pub retry_interval: Duration,
}

impl PreflightSettings {
    pub fn from_config(config: &Config, agent: Address) -> Result<Self, ConfigError> {
        Ok(Self {
            chain_id: config.chain.chain_id,
            contract: config.contract_address()?,
            agent,
            attempts: STARTUP_ATTEMPTS,
            retry_interval: config.agent.poll_interval(),
        })
    }
}

/// What the node reported during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub chain_id: u64,
    pub height: u64,
}

/// Chain id, topic hashes, registered agent (warn only), then head height.
pub async fn preflight(
    chain: &dyn ChainClient,
    registry: &EventRegistry,
    settings: &PreflightSettings,
) -> Result<NodeInfo, PreflightError> {
    let chain_id = with_retry(settings, "eth_chainId", || chain.chain_id()).await?;
    if chain_id != settings.chain_id {
        return Err(PreflightError::ChainIdMismatch {
            expected: settings.chain_id,
            actual: chain_id,
        });
    }
    info!(chain_id, "connected to node");

    for (signature, ok) in registry.verify_topic_hashes() {
        if !ok {
            return Err(PreflightError::TopicMismatch(signature));
        }
    }
    for event in registry.iter() {
        info!(event = %event.signature, topic0 = %event.topic0, "watching event");
    }

    check_registered_agent(chain, settings.contract, settings.agent).await;

    let height = with_retry(settings, "eth_blockNumber", || chain.current_height()).await?;
    Ok(NodeInfo { chain_id, height })
}

async fn with_retry<T, F, Fut>(settings: &PreflightSettings, what: &'static str, mut op: F) -> Result<T, PreflightError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let attempts = settings.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(
                    call = what,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    retry_in = ?settings.retry_interval,
                    "node not ready"
                );
                attempt += 1;
                tokio::time::sleep(settings.retry_interval).await;
            }
            Err(last) => return Err(PreflightError::Unreachable { attempts, last }),
        }
    }
}

/// The contract's `respondToNewData` reverts for any other sender.
async fn check_registered_agent(chain: &dyn ChainClient, contract: Address, ours: Address) {
    let input = Bytes::from(IDataMarketplace::aiAgentCall {}.abi_encode());
    match chain.call(contract, input).await {
        Ok(ret) => match Address::abi_decode(&ret) {
            Ok(registered) if registered == ours => {
                info!(agent = %ours, "signer is the registered agent")
            }
            Ok(registered) => warn!(
                registered = %registered,
                signer = %ours,
                "signer is not the contract's registered agent"
            ),
            Err(e) => warn!(error = %e, "undecodable aiAgent() return"),
        },
        Err(e) => warn!(error = %e, "aiAgent() read failed"),
    }
}
