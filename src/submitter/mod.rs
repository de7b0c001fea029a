//! Transaction submission: gas check, build, sign, send, confirm.
//!
//! Each attempt takes a fresh gas price and nonce snapshot. The gas price is
//! checked against the ceiling before the nonce is queried, so a skipped
//! submission never touches the account's sequence. Only one transaction from
//! the agent key is in flight at a time; the nonce is never cached or
//! incremented locally.

pub mod signer;

use crate::chain::{ChainClient, ChainError, RejectionKind};
use crate::onchain::abi::IDataMarketplace;
use crate::onchain::types::RequestData;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, Signature, TxKind, B256, U256};
use alloy::sol_types::SolCall;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use signer::{AgentSigner, SignerError};

/// Contract writes the agent can submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    RespondToNewData {
        data: RequestData,
        data_index: u32,
        is_valid: bool,
    },
    UpdateDataNeeded(String),
    CreateNewData(String),
}

impl ContractCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RespondToNewData { .. } => "respondToNewData",
            Self::UpdateDataNeeded(_) => "updateDataNeeded",
            Self::CreateNewData(_) => "createNewData",
        }
    }

    pub fn encode(&self) -> Bytes {
        let encoded = match self {
            Self::RespondToNewData {
                data,
                data_index,
                is_valid,
            } => IDataMarketplace::respondToNewDataCall {
                data: IDataMarketplace::Data {
                    description: data.description.clone(),
                    user: data.user,
                },
                referenceDataIndex: *data_index,
                isValid: *is_valid,
            }
            .abi_encode(),
            Self::UpdateDataNeeded(value) => IDataMarketplace::updateDataNeededCall {
                newDataNeeded: value.clone(),
            }
            .abi_encode(),
            Self::CreateNewData(description) => IDataMarketplace::createNewDataCall {
                description: description.clone(),
            }
            .abi_encode(),
        };
        Bytes::from(encoded)
    }
}

/// Lifecycle of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    GasChecked,
    Built,
    Signed,
    Submitted,
    Mined,
    Reverted,
    Dropped,
    Skipped,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GasChecked => "gas_checked",
            Self::Built => "built",
            Self::Signed => "signed",
            Self::Submitted => "submitted",
            Self::Mined => "mined",
            Self::Reverted => "reverted",
            Self::Dropped => "dropped",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// A signed transaction for one attempt. Never reused across attempts.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub nonce: u64,
    pub gas_price_wei: u128,
    pub chain_id: u64,
    pub to: Address,
    pub input: Bytes,
    pub signature: Signature,
    pub hash: B256,
    /// EIP-2718 encoding sent with `eth_sendRawTransaction`.
    pub raw: Bytes,
    pub state: TxState,
}

impl PendingTransaction {
    fn transition(&mut self, next: TxState) {
        debug!(tx = %self.hash, nonce = self.nonce, from = %self.state, to = %next, "tx state");
        self.state = next;
    }
}

#[derive(Debug, Clone)]
pub struct TxPolicy {
    pub chain_id: u64,
    pub gas_price_ceiling_wei: u128,
    pub gas_limit: u64,
    pub max_send_attempts: u32,
    pub receipt_timeout: Duration,
}

/// Terminal result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Gas price above the ceiling; nothing built or sent.
    Skipped { gas_price_wei: u128, ceiling_wei: u128 },
    Mined {
        tx_hash: B256,
        nonce: u64,
        block_number: Option<u64>,
        attempts: u32,
    },
    Reverted {
        tx_hash: B256,
        nonce: u64,
        block_number: Option<u64>,
    },
    /// No receipt within the timeout; the node still holds the transaction.
    Pending { tx_hash: B256, nonce: u64 },
    /// No receipt and the node no longer holds the transaction.
    Dropped { tx_hash: B256, nonce: u64 },
}

impl SubmissionOutcome {
    /// The transaction reached the chain or is still in the node's pool.
    pub fn reached_node(&self) -> bool {
        matches!(
            self,
            Self::Mined { .. } | Self::Reverted { .. } | Self::Pending { .. }
        )
    }
}

/// Result of the send phase.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Skipped { gas_price_wei: u128, ceiling_wei: u128 },
    /// The node accepted the transaction (or already had it).
    Sent { tx: PendingTransaction, attempts: u32 },
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Signing(#[from] SignerError),
    #[error("gave up after {attempts} attempts, last rejection: {last}")]
    RetriesExhausted { attempts: u32, last: RejectionKind },
}

#[derive(Debug)]
pub struct TransactionSubmitter {
    policy: TxPolicy,
    signer: AgentSigner,
}

impl TransactionSubmitter {
    pub fn new(policy: TxPolicy, signer: AgentSigner) -> Self {
        Self { policy, signer }
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    /// Current gas price when it is above the ceiling, `None` when sending is allowed.
    pub async fn gas_above_ceiling<C>(&self, chain: &C) -> Result<Option<u128>, ChainError>
    where
        C: ChainClient + ?Sized,
    {
        let gas_price = chain.gas_price().await?;
        Ok((gas_price > self.policy.gas_price_ceiling_wei).then_some(gas_price))
    }

    /// Submit `call` to `to` and wait (bounded) for its receipt.
    pub async fn submit<C>(
        &self,
        chain: &C,
        to: Address,
        call: &ContractCall,
    ) -> Result<SubmissionOutcome, SubmitError>
    where
        C: ChainClient + ?Sized,
    {
        match self.send(chain, to, call).await? {
            SendOutcome::Skipped {
                gas_price_wei,
                ceiling_wei,
            } => Ok(SubmissionOutcome::Skipped {
                gas_price_wei,
                ceiling_wei,
            }),
            SendOutcome::Sent { tx, attempts } => Ok(self.confirm(chain, tx, attempts).await),
        }
    }

    /// Gas check, build, sign and send, retrying nonce and price rejections.
    /// Returns as soon as the node holds the transaction, before any receipt.
    pub async fn send<C>(
        &self,
        chain: &C,
        to: Address,
        call: &ContractCall,
    ) -> Result<SendOutcome, SubmitError>
    where
        C: ChainClient + ?Sized,
    {
        let input = call.encode();
        let mut last_rejection = RejectionKind::Other("no attempt made".to_string());

        for attempt in 1..=self.policy.max_send_attempts {
            let gas_price = chain.gas_price().await?;
            if gas_price > self.policy.gas_price_ceiling_wei {
                info!(
                    call = call.name(),
                    gas_price,
                    ceiling = self.policy.gas_price_ceiling_wei,
                    "gas price above ceiling, skipping transaction"
                );
                return Ok(SendOutcome::Skipped {
                    gas_price_wei: gas_price,
                    ceiling_wei: self.policy.gas_price_ceiling_wei,
                });
            }

            let nonce = chain.nonce_for(self.signer.address()).await?;
            let mut pending = self.build_and_sign(to, input.clone(), nonce, gas_price)?;

            match chain.send_signed(&pending.raw).await {
                Ok(hash) => {
                    if hash != pending.hash {
                        warn!(local = %pending.hash, node = %hash, "node reported a different tx hash");
                        pending.hash = hash;
                    }
                    pending.transition(TxState::Submitted);
                    info!(
                        call = call.name(),
                        tx = %pending.hash,
                        nonce,
                        gas_price,
                        attempt,
                        "transaction submitted"
                    );
                    return Ok(SendOutcome::Sent {
                        tx: pending,
                        attempts: attempt,
                    });
                }
                Err(ChainError::Rejected(RejectionKind::AlreadyKnown)) => {
                    pending.transition(TxState::Submitted);
                    info!(tx = %pending.hash, nonce, "transaction already in node pool");
                    return Ok(SendOutcome::Sent {
                        tx: pending,
                        attempts: attempt,
                    });
                }
                Err(ChainError::Rejected(kind)) if kind.is_retryable() => {
                    warn!(
                        call = call.name(),
                        attempt,
                        max_attempts = self.policy.max_send_attempts,
                        nonce,
                        gas_price,
                        reason = %kind,
                        "transaction rejected, rebuilding with fresh nonce and gas price"
                    );
                    last_rejection = kind;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SubmitError::RetriesExhausted {
            attempts: self.policy.max_send_attempts,
            last: last_rejection,
        })
    }

    fn build_and_sign(
        &self,
        to: Address,
        input: Bytes,
        nonce: u64,
        gas_price: u128,
    ) -> Result<PendingTransaction, SubmitError> {
        let mut tx = TxLegacy {
            chain_id: Some(self.policy.chain_id),
            nonce,
            gas_price,
            gas_limit: self.policy.gas_limit,
            to: TxKind::Call(to),
            value: U256::ZERO,
            input: input.clone(),
        };
        let signature = self.signer.sign_legacy(&mut tx)?;
        let signed = tx.into_signed(signature);
        let hash = *signed.hash();
        let raw = Bytes::from(TxEnvelope::from(signed).encoded_2718());

        let mut pending = PendingTransaction {
            nonce,
            gas_price_wei: gas_price,
            chain_id: self.policy.chain_id,
            to,
            input,
            signature,
            hash,
            raw,
            state: TxState::GasChecked,
        };
        pending.transition(TxState::Built);
        pending.transition(TxState::Signed);
        Ok(pending)
    }

    /// Wait for the receipt of a sent transaction. Never fails: a missing
    /// receipt becomes `Pending` or `Dropped`.
    pub async fn confirm<C>(&self, chain: &C, mut pending: PendingTransaction, attempts: u32) -> SubmissionOutcome
    where
        C: ChainClient + ?Sized,
    {
        match chain.wait_for_receipt(pending.hash, self.policy.receipt_timeout).await {
            Ok(receipt) if receipt.success => {
                pending.transition(TxState::Mined);
                info!(
                    tx = %pending.hash,
                    block = ?receipt.block_number,
                    gas_used = receipt.gas_used,
                    "transaction mined"
                );
                SubmissionOutcome::Mined {
                    tx_hash: pending.hash,
                    nonce: pending.nonce,
                    block_number: receipt.block_number,
                    attempts,
                }
            }
            Ok(receipt) => {
                pending.transition(TxState::Reverted);
                warn!(tx = %pending.hash, block = ?receipt.block_number, "transaction reverted");
                SubmissionOutcome::Reverted {
                    tx_hash: pending.hash,
                    nonce: pending.nonce,
                    block_number: receipt.block_number,
                }
            }
            Err(e) => {
                // Without a receipt, the pending nonce tells whether the node
                // still holds our transaction.
                match chain.nonce_for(self.signer.address()).await {
                    Ok(next) if next <= pending.nonce => {
                        pending.transition(TxState::Dropped);
                        warn!(tx = %pending.hash, nonce = pending.nonce, error = %e, "transaction dropped");
                        SubmissionOutcome::Dropped {
                            tx_hash: pending.hash,
                            nonce: pending.nonce,
                        }
                    }
                    _ => {
                        warn!(
                            tx = %pending.hash,
                            nonce = pending.nonce,
                            error = %e,
                            "no receipt yet, transaction left pending"
                        );
                        SubmissionOutcome::Pending {
                            tx_hash: pending.hash,
                            nonce: pending.nonce,
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChain, ReceiptMode, DEV_KEY};
    use alloy::primitives::address;

    const CONTRACT: Address = address!("10502f20179230c67b17531355d7e439A27Fc924");

    fn submitter(ceiling: u128) -> TransactionSubmitter {
        TransactionSubmitter::new(
            TxPolicy {
                chain_id: 314159,
                gas_price_ceiling_wei: ceiling,
                gas_limit: 200_000,
                max_send_attempts: 3,
                receipt_timeout: Duration::from_millis(50),
            },
            AgentSigner::from_hex(DEV_KEY).unwrap(),
        )
    }

    fn respond_call() -> ContractCall {
        ContractCall::RespondToNewData {
            data: RequestData {
                description: "X".to_string(),
                user: address!("3C44CdDdB6a900fa2b585dd299e03d12FA4293BC"),
            },
            data_index: 5,
            is_valid: true,
        }
    }

    #[tokio::test]
    async fn test_gas_above_ceiling_consumes_no_nonce() {
        let chain = FakeChain::new(1000);
        chain.set_gas_price(60_000_000_000);
        let outcome = submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &respond_call())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SubmissionOutcome::Skipped {
                gas_price_wei: 60_000_000_000,
                ceiling_wei: 50_000_000_000
            }
        );
        assert!(chain.nonce_queries().is_empty());
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_gas_at_ceiling_is_sent() {
        let chain = FakeChain::new(1000);
        chain.set_gas_price(50_000_000_000);
        let outcome = submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &respond_call())
            .await
            .unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Mined { attempts: 1, .. }));
        assert_eq!(chain.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_signed_tx_binds_chain_nonce_and_call() {
        let chain = FakeChain::new(1000);
        chain.set_nonce(7);
        chain.set_gas_price(1_000_000_000);
        let call = respond_call();
        submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &call)
            .await
            .unwrap();

        let sent = chain.sent();
        assert_eq!(sent.len(), 1);
        let tx = &sent[0];
        assert_eq!(tx.chain_id, Some(314159));
        // Queried nonce used as-is.
        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.gas_price, 1_000_000_000);
        assert_eq!(tx.to, TxKind::Call(CONTRACT));
        assert_eq!(tx.input, call.encode());
    }

    #[tokio::test]
    async fn test_nonce_too_low_retries_with_higher_nonce() {
        let chain = FakeChain::new(1000);
        chain.set_nonce(3);
        chain.script_send(vec![Err(RejectionKind::NonceTooLow), Ok(())]);

        let outcome = submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &respond_call())
            .await
            .unwrap();

        assert!(matches!(outcome, SubmissionOutcome::Mined { attempts: 2, nonce: 4, .. }));
        let queried = chain.nonce_queries();
        assert_eq!(queried.len(), 2);
        assert!(queried[1] > queried[0]);
        assert_eq!(chain.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_underpriced_retries_with_fresh_gas_price() {
        let chain = FakeChain::new(1000);
        chain.script_send(vec![Err(RejectionKind::Underpriced), Ok(())]);

        let outcome = submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &respond_call())
            .await
            .unwrap();

        assert!(matches!(outcome, SubmissionOutcome::Mined { attempts: 2, .. }));
        assert_eq!(chain.gas_queries(), 2);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let chain = FakeChain::new(1000);
        chain.script_send(vec![
            Err(RejectionKind::Underpriced),
            Err(RejectionKind::Underpriced),
            Err(RejectionKind::Underpriced),
            Ok(()),
        ]);

        let err = submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &respond_call())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SubmitError::RetriesExhausted {
                attempts: 3,
                last: RejectionKind::Underpriced
            }
        ));
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_other_rejection_is_not_retried() {
        let chain = FakeChain::new(1000);
        chain.script_send(vec![Err(RejectionKind::Other("insufficient funds".into()))]);

        let err = submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &respond_call())
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::Chain(ChainError::Rejected(RejectionKind::Other(_)))));
        assert_eq!(chain.nonce_queries().len(), 1);
    }

    #[tokio::test]
    async fn test_already_known_is_treated_as_submitted() {
        let chain = FakeChain::new(1000);
        chain.script_send(vec![Err(RejectionKind::AlreadyKnown)]);

        let outcome = submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &respond_call())
            .await
            .unwrap();
        assert!(outcome.reached_node());
    }

    #[tokio::test]
    async fn test_receipt_timeout_leaves_transaction_pending() {
        let chain = FakeChain::new(1000);
        chain.set_receipt_mode(ReceiptMode::Timeout);

        let outcome = submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &respond_call())
            .await
            .unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Pending { nonce: 0, .. }));
        assert!(outcome.reached_node());
    }

    #[tokio::test]
    async fn test_receipt_timeout_with_unconsumed_nonce_is_dropped() {
        let chain = FakeChain::new(1000);
        chain.set_receipt_mode(ReceiptMode::Timeout);
        chain.forget_sent_nonces();

        let outcome = submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &respond_call())
            .await
            .unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Dropped { .. }));
        assert!(!outcome.reached_node());
    }

    #[tokio::test]
    async fn test_reverted_receipt() {
        let chain = FakeChain::new(1000);
        chain.set_receipt_mode(ReceiptMode::Revert);

        let outcome = submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &respond_call())
            .await
            .unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Reverted { .. }));
    }

    #[tokio::test]
    async fn test_network_error_during_gas_query_surfaces() {
        let chain = FakeChain::new(1000);
        chain.fail_gas_price(true);

        let err = submitter(50_000_000_000)
            .submit(&chain, CONTRACT, &respond_call())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Chain(ChainError::Network(_))));
        assert!(chain.nonce_queries().is_empty());
    }

    #[tokio::test]
    async fn test_send_returns_before_receipt() {
        let chain = FakeChain::new(1000);
        chain.set_nonce(2);
        chain.set_receipt_mode(ReceiptMode::Timeout);
        let submitter = submitter(50_000_000_000);

        let sent = submitter.send(&chain, CONTRACT, &respond_call()).await.unwrap();
        let SendOutcome::Sent { tx, attempts } = sent else {
            panic!("expected a sent transaction");
        };
        assert_eq!(attempts, 1);
        assert_eq!(tx.nonce, 2);
        assert_eq!(tx.state, TxState::Submitted);
        assert_eq!(chain.sent().len(), 1);
        // Receipt wait has not happened yet: only the pre-send nonce query.
        assert_eq!(chain.nonce_queries(), vec![2]);

        let outcome = submitter.confirm(&chain, tx, attempts).await;
        assert!(matches!(outcome, SubmissionOutcome::Pending { nonce: 2, .. }));
    }

    #[tokio::test]
    async fn test_gas_above_ceiling() {
        let chain = FakeChain::new(1000);
        let submitter = submitter(50_000_000_000);

        chain.set_gas_price(50_000_000_000);
        assert_eq!(submitter.gas_above_ceiling(&chain).await.unwrap(), None);

        chain.set_gas_price(60_000_000_000);
        assert_eq!(
            submitter.gas_above_ceiling(&chain).await.unwrap(),
            Some(60_000_000_000)
        );
        assert!(chain.nonce_queries().is_empty());
    }

    #[test]
    fn test_call_encodings_use_contract_selectors() {
        use crate::onchain::abi::keccak256;

        let update = ContractCall::UpdateDataNeeded("humidity".to_string()).encode();
        assert_eq!(&update[..4], &keccak256(b"updateDataNeeded(string)")[..4]);

        let create = ContractCall::CreateNewData("Test".to_string()).encode();
        assert_eq!(&create[..4], &keccak256(b"createNewData(string)")[..4]);
    }
}
