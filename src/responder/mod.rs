//! Off-chain response collaborator.
//!
//! The agent hands each new data request to a `ResponseDispatcher` and writes
//! the verdict back on-chain. How the verdict is produced (an LLM pipeline in
//! production) is not the agent's concern.

pub mod http;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpResponder;

/// What the collaborator is asked to judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseRequest {
    pub data_index: u32,
    pub description: String,
    pub user: Address,
    /// Current on-chain "data needed" value, when it could be read.
    pub data_needed: Option<String>,
}

/// The collaborator's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResponseDecision {
    pub is_valid: bool,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("response service request failed: {0}")]
    Transport(String),
    #[error("response service returned status {0}")]
    Status(u16),
    #[error("invalid response body: {0}")]
    Body(String),
}

#[async_trait]
pub trait ResponseDispatcher: Send + Sync {
    async fn respond(&self, request: &ResponseRequest) -> Result<ResponseDecision, DispatchError>;
}

/// Returns the same verdict for every request.
#[derive(Debug, Clone)]
pub struct FixedResponder {
    is_valid: bool,
}

impl FixedResponder {
    pub fn new(is_valid: bool) -> Self {
        Self { is_valid }
    }
}

#[async_trait]
impl ResponseDispatcher for FixedResponder {
    async fn respond(&self, _request: &ResponseRequest) -> Result<ResponseDecision, DispatchError> {
        Ok(ResponseDecision {
            is_valid: self.is_valid,
            content: None,
        })
    }
}
