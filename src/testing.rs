//! In-memory chain and responder doubles plus log payload builders.

use crate::chain::{ChainClient, ChainError, RawLog, Receipt, RejectionKind};
use crate::onchain::abi::{keccak256, IDataMarketplace};
use crate::responder::{DispatchError, ResponseDecision, ResponseDispatcher, ResponseRequest};

use alloy::consensus::{TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Hardhat/anvil account #0.
pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub const TEST_CHAIN_ID: u64 = 314159;

/// Big-endian 32-byte ABI word.
pub fn word(value: u64) -> [u8; 32] {
    U256::from(value).to_be_bytes::<32>()
}

/// Topic for an indexed `uint32`.
pub fn index_topic(index: u32) -> B256 {
    B256::from(word(index as u64))
}

/// Non-indexed body of `NewDataCreated`: `(Data)`.
pub fn encode_data_payload(description: &str, user: Address) -> Vec<u8> {
    let data = IDataMarketplace::Data {
        description: description.to_string(),
        user,
    };
    (data,).abi_encode_params()
}

/// Non-indexed body of `AIAgentResponded`: `(Data, address, bool)`.
pub fn encode_response_payload(
    description: &str,
    user: Address,
    agent: Address,
    is_valid: bool,
) -> Vec<u8> {
    let data = IDataMarketplace::Data {
        description: description.to_string(),
        user,
    };
    (data, agent, is_valid).abi_encode_params()
}

/// `eth_call` return data for a function returning `string`.
pub fn encode_string_return(value: &str) -> Bytes {
    Bytes::from((value.to_string(),).abi_encode_params())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Success,
    Revert,
    Timeout,
}

struct ChainState {
    chain_id: u64,
    height: u64,
    logs: Vec<RawLog>,
    fail_logs: bool,
    fail_gas_price: bool,
    fail_nonce: bool,
    unreachable_calls: u32,
    gas_price: u128,
    gas_queries: u32,
    nonce: u64,
    nonce_queries: Vec<u64>,
    consume_nonce_on_send: bool,
    send_script: VecDeque<Result<(), RejectionKind>>,
    sent: Vec<TxLegacy>,
    receipt_mode: ReceiptMode,
    receipt_delay: Option<Duration>,
    data_needed: Option<String>,
    log_queries: Vec<(u64, u64, B256)>,
}

/// Scriptable `ChainClient`. Defaults: chain 314159, 1 gwei, nonce 0, every
/// send accepted and mined at the current height.
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new(height: u64) -> Self {
        Self {
            state: Mutex::new(ChainState {
                chain_id: TEST_CHAIN_ID,
                height,
                logs: Vec::new(),
                fail_logs: false,
                fail_gas_price: false,
                fail_nonce: false,
                unreachable_calls: 0,
                gas_price: 1_000_000_000,
                gas_queries: 0,
                nonce: 0,
                nonce_queries: Vec::new(),
                consume_nonce_on_send: true,
                send_script: VecDeque::new(),
                sent: Vec::new(),
                receipt_mode: ReceiptMode::Success,
                receipt_delay: None,
                data_needed: None,
                log_queries: Vec::new(),
            }),
        }
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().unwrap().chain_id = chain_id;
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    pub fn push_log(&self, log: RawLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn fail_logs(&self, fail: bool) {
        self.state.lock().unwrap().fail_logs = fail;
    }

    pub fn fail_gas_price(&self, fail: bool) {
        self.state.lock().unwrap().fail_gas_price = fail;
    }

    pub fn fail_nonce(&self, fail: bool) {
        self.state.lock().unwrap().fail_nonce = fail;
    }

    /// The next `calls` calls to `chain_id` / `current_height` fail as if the
    /// node were down.
    pub fn unreachable_for(&self, calls: u32) {
        self.state.lock().unwrap().unreachable_calls = calls;
    }

    /// Every receipt lookup takes `delay` before answering.
    pub fn set_receipt_delay(&self, delay: Duration) {
        self.state.lock().unwrap().receipt_delay = Some(delay);
    }

    pub fn set_gas_price(&self, wei: u128) {
        self.state.lock().unwrap().gas_price = wei;
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.state.lock().unwrap().nonce = nonce;
    }

    /// Accepted sends leave the pending nonce untouched, as if the node
    /// evicted them right away.
    pub fn forget_sent_nonces(&self) {
        self.state.lock().unwrap().consume_nonce_on_send = false;
    }

    /// Outcomes for the next sends, in order. Unscripted sends are accepted.
    pub fn script_send(&self, script: Vec<Result<(), RejectionKind>>) {
        self.state.lock().unwrap().send_script = script.into();
    }

    pub fn set_receipt_mode(&self, mode: ReceiptMode) {
        self.state.lock().unwrap().receipt_mode = mode;
    }

    pub fn set_data_needed(&self, value: &str) {
        self.state.lock().unwrap().data_needed = Some(value.to_string());
    }

    /// Transactions the node accepted, decoded from their raw encoding.
    pub fn sent(&self) -> Vec<TxLegacy> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Values returned by each `nonce_for` call.
    pub fn nonce_queries(&self) -> Vec<u64> {
        self.state.lock().unwrap().nonce_queries.clone()
    }

    pub fn gas_queries(&self) -> u32 {
        self.state.lock().unwrap().gas_queries
    }

    /// `(from, to, topic0)` of each `get_logs` call.
    pub fn log_queries(&self) -> Vec<(u64, u64, B256)> {
        self.state.lock().unwrap().log_queries.clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable_calls > 0 {
            state.unreachable_calls -= 1;
            return Err(ChainError::Network("connection refused".to_string()));
        }
        Ok(state.chain_id)
    }

    async fn current_height(&self) -> Result<u64, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable_calls > 0 {
            state.unreachable_calls -= 1;
            return Err(ChainError::Network("connection refused".to_string()));
        }
        Ok(state.height)
    }

    async fn get_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
        topic0: B256,
    ) -> Result<Vec<RawLog>, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.log_queries.push((from_block, to_block, topic0));
        if state.fail_logs {
            return Err(ChainError::Network("connection refused".to_string()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|l| {
                l.address == address
                    && l.topic0() == Some(&topic0)
                    && l.block_number >= from_block
                    && l.block_number <= to_block
            })
            .cloned()
            .collect())
    }

    async fn nonce_for(&self, _address: Address) -> Result<u64, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_nonce {
            return Err(ChainError::Network("connection refused".to_string()));
        }
        let nonce = state.nonce;
        state.nonce_queries.push(nonce);
        Ok(nonce)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.gas_queries += 1;
        if state.fail_gas_price {
            return Err(ChainError::Network("connection refused".to_string()));
        }
        Ok(state.gas_price)
    }

    async fn send_signed(&self, raw_tx: &[u8]) -> Result<B256, ChainError> {
        let mut state = self.state.lock().unwrap();
        match state.send_script.pop_front() {
            Some(Err(RejectionKind::NonceTooLow)) => {
                // Another sender took the nonce.
                state.nonce += 1;
                return Err(ChainError::Rejected(RejectionKind::NonceTooLow));
            }
            Some(Err(kind)) => return Err(ChainError::Rejected(kind)),
            Some(Ok(())) | None => {}
        }

        let envelope = TxEnvelope::decode_2718(&mut &raw_tx[..])
            .map_err(|e| ChainError::Rejected(RejectionKind::Other(e.to_string())))?;
        let signed = envelope
            .as_legacy()
            .ok_or_else(|| ChainError::Rejected(RejectionKind::Other("not legacy".to_string())))?;
        state.sent.push(signed.tx().clone());
        if state.consume_nonce_on_send {
            state.nonce += 1;
        }
        Ok(keccak256(raw_tx))
    }

    async fn wait_for_receipt(&self, tx_hash: B256, timeout: Duration) -> Result<Receipt, ChainError> {
        let delay = self.state.lock().unwrap().receipt_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        match state.receipt_mode {
            ReceiptMode::Timeout => Err(ChainError::ReceiptTimeout { tx_hash, timeout }),
            mode => Ok(Receipt {
                tx_hash,
                block_number: Some(state.height),
                success: mode == ReceiptMode::Success,
                gas_used: 21_000,
            }),
        }
    }

    async fn call(&self, _to: Address, input: Bytes) -> Result<Bytes, ChainError> {
        let state = self.state.lock().unwrap();
        if input.starts_with(&IDataMarketplace::dataNeededCall::SELECTOR) {
            return match &state.data_needed {
                Some(value) => Ok(encode_string_return(value)),
                None => Err(ChainError::Network("execution reverted".to_string())),
            };
        }
        Err(ChainError::Network("unsupported call".to_string()))
    }
}

/// Responder double: per-index verdicts or failures, records every request.
pub struct ScriptedResponder {
    default_valid: bool,
    failures: Vec<u32>,
    overrides: HashMap<u32, ResponseDecision>,
    requests: Mutex<Vec<ResponseRequest>>,
}

impl ScriptedResponder {
    pub fn new(default_valid: bool) -> Self {
        Self {
            default_valid,
            failures: Vec::new(),
            overrides: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_for(mut self, data_index: u32) -> Self {
        self.failures.push(data_index);
        self
    }

    pub fn with_decision(mut self, data_index: u32, decision: ResponseDecision) -> Self {
        self.overrides.insert(data_index, decision);
        self
    }

    pub fn requests(&self) -> Vec<ResponseRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseDispatcher for ScriptedResponder {
    async fn respond(&self, request: &ResponseRequest) -> Result<ResponseDecision, DispatchError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failures.contains(&request.data_index) {
            return Err(DispatchError::Status(503));
        }
        Ok(self
            .overrides
            .get(&request.data_index)
            .cloned()
            .unwrap_or(ResponseDecision {
                is_valid: self.default_valid,
                content: None,
            }))
    }
}
