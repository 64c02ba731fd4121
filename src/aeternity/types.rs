//! Types and event-log parsing for the Aeternity side of the bridge.
//!
//! The escrow contract emits a closed set of lifecycle events. Transaction
//! logs are matched against that set here; anything unrecognized is dropped
//! without aborting the rest of the block.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Escrow lifecycle events recognized by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Deposited,
    Released,
    Disputed,
    Refunded,
}

impl EventKind {
    /// Map a contract log name to an event kind. Returns `None` for shapes
    /// the bridge does not recognize.
    pub fn from_log_name(name: &str) -> Option<Self> {
        match name {
            "FundDeposited" => Some(Self::Deposited),
            "FundReleased" => Some(Self::Released),
            "DisputeRaised" => Some(Self::Disputed),
            "FundRefunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposited => "FundDeposited",
            Self::Released => "FundReleased",
            Self::Disputed => "DisputeRaised",
            Self::Refunded => "FundRefunded",
        }
    }
}

/// Decoded fields from an escrow event log. All fields are optional because
/// each event kind populates a different subset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    pub escrow_id: Option<String>,
    pub amount: Option<String>,
    pub client: Option<String>,
    pub freelancer: Option<String>,
    pub mediator: Option<String>,
    pub reason: Option<String>,
    pub disputant: Option<String>,
}

/// A source-ledger event normalized for the orchestrator. Immutable once
/// produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    pub contract_address: String,
    pub tx_hash: String,
    pub block_height: u64,
    /// Millisecond timestamp reported by the source ledger.
    pub timestamp: i64,
    pub payload: EventPayload,
}

impl NormalizedEvent {
    /// The escrow identity this event refers to. Falls back to the contract
    /// address when the log carries no explicit id.
    pub fn escrow_id(&self) -> &str {
        self.payload
            .escrow_id
            .as_deref()
            .unwrap_or(&self.contract_address)
    }

    /// Dedup key for the recently-seen window: one event per log kind per
    /// transaction.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.tx_hash, self.kind.as_str())
    }
}

/// On-chain state of an escrow contract, queried when a deposit is observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowState {
    pub address: String,
    pub client: String,
    pub freelancer: String,
    pub mediator: String,
    pub amount: String,
    pub deadline: u64,
    pub disputed: bool,
}

/// Read-only connectivity snapshot consumed by the external health probe.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connected: bool,
    pub push_degraded: bool,
    pub reconnect_attempts: u32,
    pub last_processed_height: u64,
    pub contract_address: Option<String>,
}

/// Errors from the Aeternity node API. All of these are transient from the
/// bridge's point of view.
#[derive(Debug, thiserror::Error)]
pub enum AeternityError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node RPC error: {0}")]
    Rpc(String),

    #[error("push channel error: {0}")]
    Push(String),
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Parse a single contract log entry against the known event shapes.
///
/// Returns `None` for unrecognized logs; the caller logs and moves on.
pub fn parse_event_log(log: &Value, transaction: &Value) -> Option<NormalizedEvent> {
    let name = log.get("event").and_then(Value::as_str)?;
    let kind = EventKind::from_log_name(name)?;

    let data = log.get("data").cloned().unwrap_or(Value::Null);
    let payload = EventPayload {
        escrow_id: str_field(&data, "escrow_id"),
        amount: str_field(&data, "amount"),
        client: str_field(&data, "client"),
        freelancer: str_field(&data, "freelancer"),
        mediator: str_field(&data, "mediator"),
        reason: str_field(&data, "reason"),
        disputant: str_field(&data, "disputant"),
    };

    Some(NormalizedEvent {
        kind,
        contract_address: str_field(transaction, "contract_id").unwrap_or_default(),
        tx_hash: str_field(transaction, "hash").unwrap_or_default(),
        block_height: transaction
            .get("block_height")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        timestamp: transaction
            .get("micro_time")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        payload,
    })
}

/// Extract every recognized event from a transaction, preserving log order.
///
/// When `contract_filter` is set, transactions against other contracts are
/// skipped entirely.
pub fn parse_transaction_events(
    transaction: &Value,
    contract_filter: Option<&str>,
) -> Vec<NormalizedEvent> {
    if let Some(filter) = contract_filter {
        match transaction.get("contract_id").and_then(Value::as_str) {
            Some(contract) if contract == filter => {}
            _ => return Vec::new(),
        }
    }

    let Some(logs) = transaction.get("log").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for log in logs {
        match parse_event_log(log, transaction) {
            Some(event) => events.push(event),
            None => {
                tracing::debug!(
                    log = %log,
                    tx_hash = transaction
                        .get("hash")
                        .and_then(|hash| hash.as_str())
                        .unwrap_or("unknown"),
                    "dropping unrecognized event log"
                );
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deposit_tx() -> Value {
        json!({
            "hash": "th_abc123",
            "contract_id": "ct_escrow1",
            "block_height": 42,
            "micro_time": 1_700_000_000_000i64,
            "log": [
                {
                    "event": "FundDeposited",
                    "data": {
                        "escrow_id": "E1",
                        "amount": "100",
                        "client": "ak_client"
                    }
                }
            ]
        })
    }

    #[test]
    fn parses_deposit_log() {
        let events = parse_transaction_events(&deposit_tx(), None);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, EventKind::Deposited);
        assert_eq!(event.escrow_id(), "E1");
        assert_eq!(event.block_height, 42);
        assert_eq!(event.payload.amount.as_deref(), Some("100"));
    }

    #[test]
    fn parses_all_known_kinds() {
        for (name, kind) in [
            ("FundDeposited", EventKind::Deposited),
            ("FundReleased", EventKind::Released),
            ("DisputeRaised", EventKind::Disputed),
            ("FundRefunded", EventKind::Refunded),
        ] {
            let tx = json!({
                "hash": "th_x",
                "contract_id": "ct_escrow1",
                "block_height": 1,
                "micro_time": 0,
                "log": [{ "event": name, "data": {} }]
            });
            let events = parse_transaction_events(&tx, None);
            assert_eq!(events.len(), 1, "{name} should parse");
            assert_eq!(events[0].kind, kind);
        }
    }

    #[test]
    fn drops_unrecognized_log_without_dropping_the_rest() {
        let tx = json!({
            "hash": "th_mixed",
            "contract_id": "ct_escrow1",
            "block_height": 7,
            "micro_time": 0,
            "log": [
                { "event": "SomethingElse", "data": {} },
                { "event": "FundReleased", "data": { "escrow_id": "E2" } }
            ]
        });
        let events = parse_transaction_events(&tx, None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Released);
    }

    #[test]
    fn contract_filter_skips_other_contracts() {
        let events = parse_transaction_events(&deposit_tx(), Some("ct_other"));
        assert!(events.is_empty());

        let events = parse_transaction_events(&deposit_tx(), Some("ct_escrow1"));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn transaction_without_logs_yields_nothing() {
        let tx = json!({ "hash": "th_plain", "contract_id": "ct_escrow1" });
        assert!(parse_transaction_events(&tx, None).is_empty());
    }

    #[test]
    fn escrow_id_falls_back_to_contract_address() {
        let tx = json!({
            "hash": "th_nofield",
            "contract_id": "ct_escrow9",
            "block_height": 3,
            "micro_time": 0,
            "log": [{ "event": "FundDeposited", "data": { "amount": "5" } }]
        });
        let events = parse_transaction_events(&tx, None);
        assert_eq!(events[0].escrow_id(), "ct_escrow9");
    }
}
