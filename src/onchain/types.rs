//! Decoded contract events and the typed views the agent acts on.

use alloy::primitives::{Address, B256, I256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::decoder::DecodeError;

/// Identity of a log on the chain; unique per chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    pub block_number: u64,
    pub log_index: u64,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// A decoded ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventValue {
    Bool(bool),
    Uint(U256, usize),
    Int(I256, usize),
    Address(Address),
    FixedBytes(B256, usize),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<EventValue>),
    /// Struct fields in declared order.
    Tuple(Vec<(String, EventValue)>),
    /// Indexed dynamic parameter: only its keccak hash is on chain.
    Hashed(B256),
}

impl EventValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Uint(v, _) => (*v).try_into().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Named field of a tuple value.
    pub fn field(&self, name: &str) -> Option<&EventValue> {
        match self {
            Self::Tuple(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

/// A log that matched a registered event and decoded cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub name: String,
    pub contract_address: Address,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: Option<B256>,
    pub args: Vec<(String, EventValue)>,
}

impl ChainEvent {
    pub fn id(&self) -> EventId {
        EventId {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }

    pub fn arg(&self, name: &str) -> Option<&EventValue> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn require(&self, name: &'static str) -> Result<&EventValue, DecodeError> {
        self.arg(name).ok_or(DecodeError::MissingField(name))
    }
}

impl fmt::Display for ChainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.id())
    }
}

/// The `DataMarketplace.Data` struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestData {
    pub description: String,
    pub user: Address,
}

impl TryFrom<&EventValue> for RequestData {
    type Error = DecodeError;

    fn try_from(value: &EventValue) -> Result<Self, Self::Error> {
        let description = value
            .field("description")
            .and_then(EventValue::as_str)
            .ok_or(DecodeError::MissingField("data.description"))?;
        let user = value
            .field("user")
            .and_then(EventValue::as_address)
            .ok_or(DecodeError::MissingField("data.user"))?;
        Ok(Self {
            description: description.to_string(),
            user,
        })
    }
}

fn data_index(event: &ChainEvent) -> Result<u32, DecodeError> {
    event
        .require("dataIndex")?
        .as_u32()
        .ok_or(DecodeError::MissingField("dataIndex"))
}

/// `NewDataCreated(uint32 indexed dataIndex, Data data)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDataRequest {
    pub id: EventId,
    pub data_index: u32,
    pub data: RequestData,
}

impl TryFrom<&ChainEvent> for NewDataRequest {
    type Error = DecodeError;

    fn try_from(event: &ChainEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            id: event.id(),
            data_index: data_index(event)?,
            data: RequestData::try_from(event.require("data")?)?,
        })
    }
}

/// `AIAgentResponded(uint32 indexed dataIndex, Data data, address aiAgent, bool isValid)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    pub id: EventId,
    pub data_index: u32,
    pub data: RequestData,
    pub ai_agent: Address,
    pub is_valid: bool,
}

impl TryFrom<&ChainEvent> for AgentResponse {
    type Error = DecodeError;

    fn try_from(event: &ChainEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            id: event.id(),
            data_index: data_index(event)?,
            data: RequestData::try_from(event.require("data")?)?,
            ai_agent: event
                .require("aiAgent")?
                .as_address()
                .ok_or(DecodeError::MissingField("aiAgent"))?,
            is_valid: event
                .require("isValid")?
                .as_bool()
                .ok_or(DecodeError::MissingField("isValid"))?,
        })
    }
}
