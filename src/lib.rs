//! DataMarketplace response agent.
//!
//! Polls the contract's event log for new data requests, asks an off-chain
//! collaborator for a verdict, and writes the verdict back on-chain as a signed
//! transaction.

pub mod agent;
pub mod chain;
pub mod config;
pub mod onchain;
pub mod responder;
pub mod store;
pub mod submitter;
pub mod tracker;

#[cfg(test)]
mod testing;
