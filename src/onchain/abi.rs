//! DataMarketplace ABI: event signature registry and call encodings.
//!
//! Event topic0 hashes are computed once at startup from the ABI JSON shipped in
//! `abi/DataMarketplace.json`: keccak256 of `Name(type1,type2,...)` over every
//! parameter in declared order, indexed or not, with tuples rendered as `(t1,t2)`.

use alloy::json_abi::{Event, JsonAbi, Param};
use alloy::primitives::B256;
use alloy::sol;
use std::fmt;
use thiserror::Error;

pub const DATA_MARKETPLACE_ABI: &str = include_str!("../../abi/DataMarketplace.json");

pub const NEW_DATA_CREATED: &str = "NewDataCreated";
pub const AI_AGENT_RESPONDED: &str = "AIAgentResponded";

/// Events the agent scans for, in processing order.
pub const WATCHED_EVENTS: [&str; 2] = [NEW_DATA_CREATED, AI_AGENT_RESPONDED];

sol! {
    interface IDataMarketplace {
        struct Data {
            string description;
            address user;
        }

        function respondToNewData(Data data, uint32 referenceDataIndex, bool isValid) external;
        function createNewData(string description) external returns (Data memory);
        function updateDataNeeded(string newDataNeeded) external;
        function dataNeeded() external view returns (string memory);
        function aiAgent() external view returns (address);
        function latestDataNum() external view returns (uint32);
    }
}

#[derive(Error, Debug)]
pub enum AbiError {
    #[error("failed to parse ABI JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("event {0} not found in ABI")]
    MissingEvent(String),
    #[error("event {0} is declared more than once")]
    OverloadedEvent(String),
}

/// Compute keccak256 hash of a byte slice.
pub fn keccak256(data: &[u8]) -> B256 {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Canonical ABI type of a parameter: `tuple` / `tuple[]` expand to their
/// component list, everything else is the declared type.
pub fn canonical_type(ty: &str, components: &[Param]) -> String {
    match ty.strip_prefix("tuple") {
        Some(suffix) => {
            let inner: Vec<String> = components
                .iter()
                .map(|c| canonical_type(&c.ty, &c.components))
                .collect();
            format!("({}){}", inner.join(","), suffix)
        }
        None => ty.to_string(),
    }
}

/// One registered event: canonical signature and its topic0.
#[derive(Debug, Clone)]
pub struct EventSignature {
    pub name: String,
    pub signature: String,
    pub topic0: B256,
    pub event: Event,
}

impl EventSignature {
    pub fn from_event(event: Event) -> Self {
        let params: Vec<String> = event
            .inputs
            .iter()
            .map(|p| canonical_type(&p.ty, &p.components))
            .collect();
        let signature = format!("{}({})", event.name, params.join(","));
        let topic0 = keccak256(signature.as_bytes());
        Self {
            name: event.name.clone(),
            signature,
            topic0,
            event,
        }
    }
}

impl fmt::Display for EventSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.signature, self.topic0)
    }
}

/// Immutable event name → signature → topic0 mapping.
#[derive(Debug, Clone)]
pub struct EventRegistry {
    events: Vec<EventSignature>,
}

impl EventRegistry {
    /// Register `names` from an ABI JSON document.
    pub fn from_abi_json(json: &str, names: &[&str]) -> Result<Self, AbiError> {
        let abi: JsonAbi = serde_json::from_str(json)?;
        let mut events = Vec::with_capacity(names.len());
        for name in names {
            let declared = abi
                .events
                .get(*name)
                .ok_or_else(|| AbiError::MissingEvent(name.to_string()))?;
            if declared.len() != 1 {
                return Err(AbiError::OverloadedEvent(name.to_string()));
            }
            events.push(EventSignature::from_event(declared[0].clone()));
        }
        Ok(Self { events })
    }

    /// Registry for the events the agent watches on DataMarketplace.
    pub fn data_marketplace() -> Result<Self, AbiError> {
        Self::from_abi_json(DATA_MARKETPLACE_ABI, &WATCHED_EVENTS)
    }

    pub fn get(&self, name: &str) -> Option<&EventSignature> {
        self.events.iter().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventSignature> {
        self.events.iter()
    }

    /// Compare our computed topic hashes with alloy's own selector derivation.
    /// Call this at startup to catch any signature mismatches.
    pub fn verify_topic_hashes(&self) -> Vec<(String, bool)> {
        self.events
            .iter()
            .map(|e| (e.signature.clone(), e.topic0 == e.event.selector()))
            .collect()
    }
}
