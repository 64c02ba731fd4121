//! HTTP client for the Aeternity node API.
//!
//! Wraps the block-height, block-transactions, and contract-state endpoints
//! behind the `AeternityRpc` trait so ingestion and orchestration can be
//! exercised against a mock node in tests.

use super::types::{AeternityError, EscrowState};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Query surface of the source ledger used by the bridge.
#[async_trait::async_trait]
pub trait AeternityRpc: Send + Sync {
    /// Height of the current top block.
    async fn current_height(&self) -> Result<u64, AeternityError>;

    /// All transactions included in the block at `height`.
    async fn block_transactions(&self, height: u64) -> Result<Vec<Value>, AeternityError>;

    /// Current on-chain state of an escrow contract.
    async fn escrow_state(&self, address: &str) -> Result<EscrowState, AeternityError>;
}

/// Aeternity node HTTP client.
#[derive(Clone)]
pub struct AeternityClient {
    http: Client,
    rpc_url: String,
}

impl AeternityClient {
    pub fn new(rpc_url: String, request_timeout: Duration) -> Result<Self, AeternityError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http, rpc_url })
    }

    async fn get_json(&self, path: &str) -> Result<Value, AeternityError> {
        let url = format!("{}{}", self.rpc_url, path);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(AeternityError::Rpc(format!(
                "GET {} returned {}",
                path,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl AeternityRpc for AeternityClient {
    async fn current_height(&self) -> Result<u64, AeternityError> {
        let top = self.get_json("/v3/blocks/top").await?;
        top.get("height")
            .and_then(Value::as_u64)
            .ok_or_else(|| AeternityError::Rpc("top block missing height field".to_string()))
    }

    async fn block_transactions(&self, height: u64) -> Result<Vec<Value>, AeternityError> {
        let body = self
            .get_json(&format!("/v3/blocks/{height}/transactions"))
            .await?;
        Ok(body
            .get("transactions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn escrow_state(&self, address: &str) -> Result<EscrowState, AeternityError> {
        let contract = self.get_json(&format!("/v3/contracts/{address}")).await?;
        let state = contract.get("state").cloned().unwrap_or(Value::Null);

        let field = |key: &str| {
            state
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(EscrowState {
            address: address.to_string(),
            client: field("client"),
            freelancer: field("freelancer"),
            mediator: field("mediator"),
            amount: state
                .get("amount")
                .and_then(Value::as_str)
                .unwrap_or("0")
                .to_string(),
            deadline: state.get("deadline").and_then(Value::as_u64).unwrap_or(0),
            disputed: state
                .get("disputed")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}
