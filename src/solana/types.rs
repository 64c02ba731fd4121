//! Operation and status types for the receipt-token program on Solana.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Lifecycle status carried by a receipt token on the target ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Active,
    Released,
    Disputed,
    Refunded,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Released => "released",
            Self::Disputed => "disputed",
            Self::Refunded => "refunded",
        }
    }
}

/// The three instructions the bridge submits against the receipt program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationKind {
    Mint {
        client_wallet: String,
        freelancer_wallet: String,
        amount: u64,
        memo: String,
    },
    UpdateStatus {
        status: ReceiptStatus,
    },
    Transfer {
        to_wallet: String,
    },
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mint { .. } => "mint",
            Self::UpdateStatus { .. } => "update_status",
            Self::Transfer { .. } => "transfer",
        }
    }
}

/// A unit of work owned by the dispatcher until it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct Operation {
    pub escrow_id: String,
    pub kind: OperationKind,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(escrow_id: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            escrow_id: escrow_id.into(),
            kind,
            retry_count: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// Terminal outcome of an operation, reported to the orchestrator.
#[derive(Debug, Clone)]
pub struct OperationReport {
    pub escrow_id: String,
    pub kind: OperationKind,
    pub retry_count: u32,
    /// Transaction signature on success, failure reason otherwise.
    pub result: Result<String, String>,
}

/// Why an awaited operation did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("operation failed after {attempts} attempts: {reason}")]
    RetryExhausted { attempts: u32, reason: String },

    #[error("dispatcher shut down before the operation completed")]
    Cancelled,
}

/// Resolves exactly once when the enqueued operation reaches a terminal
/// state: the transaction signature on success, or the exhaustion error.
pub struct CompletionHandle {
    rx: oneshot::Receiver<Result<String, OperationError>>,
}

impl CompletionHandle {
    pub(crate) fn new(rx: oneshot::Receiver<Result<String, OperationError>>) -> Self {
        Self { rx }
    }

    pub async fn wait(self) -> Result<String, OperationError> {
        self.rx.await.unwrap_or(Err(OperationError::Cancelled))
    }
}

/// Dispatcher queue snapshot for the external health probe.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub pending_count: usize,
    pub max_concurrent: usize,
}

/// Errors from the Solana RPC boundary. All are retried under the
/// dispatcher's backoff policy.
#[derive(Debug, thiserror::Error)]
pub enum SolanaError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("submission error: {0}")]
    Submission(String),
}
