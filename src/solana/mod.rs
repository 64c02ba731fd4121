//! Target-ledger integration: submission of receipt-program operations to
//! Solana with bounded concurrency, retry, and backoff.

/// JSON-RPC client and the oracle signing authority
mod client;
/// Retry/backoff execution queue
mod dispatcher;
/// Operation, report, and error types
mod types;

pub use client::{ReceiptProgram, SolanaClient, SolanaInfo, derive_signing_key};
pub use dispatcher::OperationDispatcher;
pub use types::*;
