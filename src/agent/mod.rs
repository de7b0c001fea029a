//! The poll loop: scan, decode, dispatch, submit, advance.
//!
//! One iteration:
//!   1. `current_height` → `next_range` (empty → done)
//!   2. `get_logs` per watched event; any failure aborts with no advance
//!   3. decode, skip bad logs, order by `(block, log_index)`
//!   4. collect dataIndexes this agent already answered on-chain
//!   5. respond to every new request not yet dispatched
//!   6. advance the watermark, held back to the earliest skipped request
//!
//! The loop owns all mutable state; nothing is shared across tasks.

pub mod preflight;

use crate::chain::{ChainClient, ChainError};
use crate::config::Config;
use crate::onchain::abi::{IDataMarketplace, AI_AGENT_RESPONDED, NEW_DATA_CREATED};
use crate::onchain::{AgentResponse, ChainEvent, DecodeError, EventDecoder, EventId, EventRegistry, NewDataRequest};
use crate::responder::{ResponseDispatcher, ResponseRequest};
use crate::store::{PersistedState, StateStore};
use crate::submitter::{ContractCall, SendOutcome, SubmissionOutcome, SubmitError, TransactionSubmitter};
use crate::tracker::{BlockRange, BlockRangeTracker};

use alloy::primitives::{Address, Bytes};
use alloy::sol_types::{SolCall, SolValue};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use preflight::{preflight, NodeInfo, PreflightError, PreflightSettings};

#[derive(Error, Debug)]
pub enum IterationError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("iteration exceeded deadline of {0:?}")]
    Deadline(Duration),
}

/// Everything the loop mutates, owned in one place.
#[derive(Debug)]
pub struct AgentState {
    pub tracker: BlockRangeTracker,
    /// Requests whose response transaction reached the node.
    pub dispatched: BTreeSet<EventId>,
    pub submitter: TransactionSubmitter,
}

impl AgentState {
    /// Resume from persisted state, or start `lookback` blocks behind `current_height`.
    pub fn restore(
        persisted: Option<PersistedState>,
        current_height: u64,
        lookback: u64,
        submitter: TransactionSubmitter,
    ) -> Self {
        match persisted {
            Some(state) => Self {
                tracker: BlockRangeTracker::new(state.last_scanned_block),
                dispatched: state.dispatched,
                submitter,
            },
            None => {
                let tracker = BlockRangeTracker::seeded(current_height, lookback);
                info!(
                    block = tracker.last_scanned_block(),
                    lookback, "no saved state, starting behind head"
                );
                Self {
                    tracker,
                    dispatched: BTreeSet::new(),
                    submitter,
                }
            }
        }
    }

    pub fn snapshot(&self) -> PersistedState {
        PersistedState {
            last_scanned_block: self.tracker.last_scanned_block(),
            dispatched: self.dispatched.clone(),
        }
    }

    /// Advance and drop ledger entries that can no longer be rescanned.
    fn advance(&mut self, to: u64) -> bool {
        let moved = self.tracker.advance(to);
        let floor = self.tracker.last_scanned_block();
        self.dispatched.retain(|id| id.block_number >= floor);
        moved
    }
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub contract: Address,
    pub poll_interval: Duration,
    pub iteration_deadline: Duration,
    pub publish_data_needed: bool,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Result<Self, crate::config::ConfigError> {
        Ok(Self {
            contract: config.contract_address()?,
            poll_interval: config.agent.poll_interval(),
            iteration_deadline: config.agent.iteration_deadline(),
            publish_data_needed: config.agent.publish_data_needed,
        })
    }
}

/// Counters for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub range: Option<BlockRange>,
    pub events: usize,
    pub decode_failures: usize,
    pub responded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub watermark: u64,
}

enum RequestOutcome {
    /// Response transaction reached the node.
    Accepted,
    /// Not sent for a reason that clears by itself; rescan it.
    Held,
    /// Event-local failure, already logged.
    Failed,
}

pub struct PollLoop {
    chain: Arc<dyn ChainClient>,
    dispatcher: Arc<dyn ResponseDispatcher>,
    registry: EventRegistry,
    decoder: EventDecoder,
    settings: LoopSettings,
    state: AgentState,
    store: Option<StateStore>,
}

impl PollLoop {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        dispatcher: Arc<dyn ResponseDispatcher>,
        registry: EventRegistry,
        settings: LoopSettings,
        state: AgentState,
    ) -> Result<Self, DecodeError> {
        let decoder = EventDecoder::new(&registry)?;
        Ok(Self {
            chain,
            dispatcher,
            registry,
            decoder,
            settings,
            state,
            store: None,
        })
    }

    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Poll until `shutdown` resolves. Iteration errors are logged, never fatal.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            contract = %self.settings.contract,
            agent = %self.state.submitter.signer_address(),
            from_block = self.state.tracker.last_scanned_block(),
            interval = ?self.settings.poll_interval,
            "poll loop started"
        );

        loop {
            match self.run_iteration_with_deadline().await {
                Ok(report) => match report.range {
                    Some(range) => info!(
                        %range,
                        events = report.events,
                        responded = report.responded,
                        skipped = report.skipped,
                        failed = report.failed,
                        decode_failures = report.decode_failures,
                        watermark = report.watermark,
                        "iteration complete"
                    ),
                    None => debug!(watermark = report.watermark, "no new blocks"),
                },
                Err(e) => error!(
                    error = %e,
                    watermark = self.state.tracker.last_scanned_block(),
                    "iteration failed, will retry same range"
                ),
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        self.persist();
        info!(watermark = self.state.tracker.last_scanned_block(), "poll loop stopped");
    }

    pub async fn run_iteration_with_deadline(&mut self) -> Result<IterationReport, IterationError> {
        let deadline = self.settings.iteration_deadline;
        tokio::time::timeout(deadline, self.run_iteration())
            .await
            .map_err(|_| IterationError::Deadline(deadline))?
    }

    pub async fn run_iteration(&mut self) -> Result<IterationReport, IterationError> {
        let height = self.chain.current_height().await?;
        let range = self.state.tracker.next_range(height);
        let mut report = IterationReport {
            watermark: self.state.tracker.last_scanned_block(),
            ..Default::default()
        };
        if range.is_empty() {
            return Ok(report);
        }
        report.range = Some(range);

        let mut events = Vec::new();
        for signature in self.registry.iter() {
            let logs = self
                .chain
                .get_logs(self.settings.contract, range.from, range.to, signature.topic0)
                .await?;
            debug!(event = %signature.name, %range, count = logs.len(), "fetched logs");
            for log in &logs {
                match self.decoder.decode(log) {
                    Ok(Some(event)) => events.push(event),
                    Ok(None) => {}
                    Err(e) => {
                        report.decode_failures += 1;
                        warn!(
                            block = log.block_number,
                            log_index = log.log_index,
                            error = %e,
                            "skipping undecodable log"
                        );
                    }
                }
            }
        }
        events.sort_by_key(ChainEvent::id);
        events.dedup_by_key(|e| e.id());
        report.events = events.len();

        let answered = self.answered_by_us(&events);
        let mut hold: Option<u64> = None;

        for event in events.iter().filter(|e| e.name == NEW_DATA_CREATED) {
            let request = match NewDataRequest::try_from(event) {
                Ok(r) => r,
                Err(e) => {
                    report.decode_failures += 1;
                    warn!(event = %event.id(), error = %e, "malformed NewDataCreated");
                    continue;
                }
            };
            if self.state.dispatched.contains(&request.id) {
                debug!(event = %request.id, data_index = request.data_index, "already dispatched");
                continue;
            }
            if answered.contains(&request.data_index) {
                info!(
                    event = %request.id,
                    data_index = request.data_index,
                    "response already on-chain, not answering again"
                );
                self.mark_dispatched(request.id);
                continue;
            }

            match self.handle_request(&request).await? {
                RequestOutcome::Accepted => report.responded += 1,
                RequestOutcome::Held => {
                    report.skipped += 1;
                    let block = request.id.block_number;
                    hold = Some(hold.map_or(block, |h| h.min(block)));
                }
                RequestOutcome::Failed => report.failed += 1,
            }
        }

        let target = hold.map_or(range.to, |h| h.min(range.to));
        if let Some(h) = hold {
            info!(held_at = h, %range, "holding watermark for skipped requests");
        }
        self.state.advance(target);
        self.persist();
        report.watermark = self.state.tracker.last_scanned_block();
        Ok(report)
    }

    fn answered_by_us(&self, events: &[ChainEvent]) -> HashSet<u32> {
        let agent = self.state.submitter.signer_address();
        events
            .iter()
            .filter(|e| e.name == AI_AGENT_RESPONDED)
            .filter_map(|e| match AgentResponse::try_from(e) {
                Ok(r) => Some(r),
                Err(err) => {
                    warn!(event = %e.id(), error = %err, "malformed AIAgentResponded");
                    None
                }
            })
            .filter(|r| r.ai_agent == agent)
            .map(|r| r.data_index)
            .collect()
    }

    /// Network failures propagate so the iteration ends without advancing.
    async fn handle_request(&mut self, request: &NewDataRequest) -> Result<RequestOutcome, IterationError> {
        if let Some(gas_price) = self.state.submitter.gas_above_ceiling(self.chain.as_ref()).await? {
            info!(
                event = %request.id,
                data_index = request.data_index,
                gas_price,
                "gas price above ceiling, deferring request"
            );
            return Ok(RequestOutcome::Held);
        }

        let data_needed = self.read_data_needed().await;
        let dispatch = ResponseRequest {
            data_index: request.data_index,
            description: request.data.description.clone(),
            user: request.data.user,
            data_needed: data_needed.clone(),
        };

        let decision = match self.dispatcher.respond(&dispatch).await {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    event = %request.id,
                    data_index = request.data_index,
                    error = %e,
                    "response collaborator failed"
                );
                return Ok(RequestOutcome::Failed);
            }
        };
        info!(
            event = %request.id,
            data_index = request.data_index,
            is_valid = decision.is_valid,
            "response decided"
        );

        let call = ContractCall::RespondToNewData {
            data: request.data.clone(),
            data_index: request.data_index,
            is_valid: decision.is_valid,
        };
        let sent = match self
            .state
            .submitter
            .send(self.chain.as_ref(), self.settings.contract, &call)
            .await
        {
            Ok(sent) => sent,
            Err(SubmitError::Chain(e @ ChainError::Network(_))) => return Err(e.into()),
            Err(e) => {
                warn!(
                    event = %request.id,
                    data_index = request.data_index,
                    error = %e,
                    "response submission failed"
                );
                return Ok(RequestOutcome::Failed);
            }
        };
        let (tx, attempts) = match sent {
            SendOutcome::Skipped { .. } => return Ok(RequestOutcome::Held),
            SendOutcome::Sent { tx, attempts } => (tx, attempts),
        };

        // The node holds the response from here on. Mark before the receipt
        // wait so a deadline cut cannot lead to a second send.
        self.mark_dispatched(request.id);

        let outcome = self
            .state
            .submitter
            .confirm(self.chain.as_ref(), tx, attempts)
            .await;
        if let SubmissionOutcome::Dropped { tx_hash, nonce } = outcome {
            warn!(
                event = %request.id,
                data_index = request.data_index,
                tx = %tx_hash,
                nonce,
                "response transaction dropped, will resend"
            );
            self.state.dispatched.remove(&request.id);
            self.persist();
            return Ok(RequestOutcome::Held);
        }

        if self.settings.publish_data_needed {
            if let Some(content) = decision.content {
                if data_needed.as_deref() != Some(content.as_str()) {
                    self.publish_data_needed(request, content).await;
                }
            }
        }
        Ok(RequestOutcome::Accepted)
    }

    /// Best effort; the response itself already went out.
    async fn publish_data_needed(&self, request: &NewDataRequest, content: String) {
        let call = ContractCall::UpdateDataNeeded(content);
        match self
            .state
            .submitter
            .submit(self.chain.as_ref(), self.settings.contract, &call)
            .await
        {
            Ok(outcome) if outcome.reached_node() => info!(
                event = %request.id,
                data_index = request.data_index,
                outcome = ?outcome,
                "data needed updated"
            ),
            Ok(outcome) => warn!(
                event = %request.id,
                data_index = request.data_index,
                outcome = ?outcome,
                "data needed update not applied"
            ),
            Err(e) => warn!(
                event = %request.id,
                data_index = request.data_index,
                error = %e,
                "data needed update failed"
            ),
        }
    }

    async fn read_data_needed(&self) -> Option<String> {
        let input = Bytes::from(IDataMarketplace::dataNeededCall {}.abi_encode());
        match self.chain.call(self.settings.contract, input).await {
            Ok(ret) => match String::abi_decode(&ret) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(error = %e, "undecodable dataNeeded() return");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "dataNeeded() read failed");
                None
            }
        }
    }

    fn mark_dispatched(&mut self, id: EventId) {
        self.state.dispatched.insert(id);
        self.persist();
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.state.snapshot()) {
                error!(error = %e, "failed to persist agent state");
            }
        }
    }
}
