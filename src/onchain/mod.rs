//! DataMarketplace contract surface.
//!
//! - `abi`: event signature registry (topic0 hashes built from the ABI JSON at
//!   startup) and `sol!` bindings for the calls the agent sends or reads
//! - `decoder`: raw log → `ChainEvent`, skipping logs that are not ours
//! - `types`: `ChainEvent`, `EventValue`, and the typed `NewDataRequest` /
//!   `AgentResponse` views consumed by the poll loop

pub mod abi;
pub mod decoder;
pub mod types;

pub use abi::{EventRegistry, EventSignature};
pub use decoder::{DecodeError, EventDecoder};
pub use types::{AgentResponse, ChainEvent, EventId, EventValue, NewDataRequest, RequestData};
