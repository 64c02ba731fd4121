//! Source-ledger integration: event ingestion from the Aeternity escrow
//! contract over the node's HTTP API (poll backstop) and WebSocket channel
//! (push path).

/// HTTP node client and the RPC trait used by ingestion and orchestration
mod client;
/// Dual-mode (push + poll) event listener
mod listener;
/// Event, state, and error types plus log parsing
mod types;

pub use client::{AeternityClient, AeternityRpc};
pub use listener::AeternityListener;
pub use types::*;
