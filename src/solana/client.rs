//! JSON-RPC submission client for the receipt-token program.
//!
//! The bridge acts as the program's oracle authority: a deterministic
//! ed25519 key derived from the configured seed signs every submitted
//! instruction. Account derivation here is deliberately thin; the exact
//! program-derived-address scheme belongs to the target ledger, not to the
//! bridge.

use super::types::{Operation, OperationKind, SolanaError};
use crate::config::SolanaConfig;
use ed25519_dalek::{Signer, SigningKey};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Transaction-submission surface of the target ledger, abstracted so the
/// dispatcher can be driven by a mock program in tests.
#[async_trait::async_trait]
pub trait ReceiptProgram: Send + Sync {
    /// Submit one operation, returning the transaction signature.
    async fn submit(&self, operation: &Operation) -> Result<String, SolanaError>;
}

/// Connection details exposed to the external health probe.
#[derive(Debug, Clone, Serialize)]
pub struct SolanaInfo {
    pub cluster: String,
    pub rpc_url: String,
    pub program_id: String,
    pub oracle_pubkey: String,
}

/// Solana RPC client holding the oracle signing authority.
pub struct SolanaClient {
    http: Client,
    rpc_url: String,
    cluster: String,
    program_id: String,
    oracle: SigningKey,
}

impl SolanaClient {
    pub fn new(config: &SolanaConfig) -> Result<Self, SolanaError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            rpc_url: config.rpc_url.clone(),
            cluster: config.cluster.clone(),
            program_id: config.program_id.clone(),
            oracle: derive_signing_key(&config.oracle_seed),
        })
    }

    pub fn oracle_pubkey(&self) -> String {
        hex::encode(self.oracle.verifying_key().to_bytes())
    }

    pub fn connection_info(&self) -> SolanaInfo {
        SolanaInfo {
            cluster: self.cluster.clone(),
            rpc_url: self.rpc_url.clone(),
            program_id: self.program_id.clone(),
            oracle_pubkey: self.oracle_pubkey(),
        }
    }

    /// Deterministic receipt account for an escrow, namespaced under the
    /// program id.
    fn receipt_account(&self, escrow_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"escrow_receipt");
        hasher.update(self.program_id.as_bytes());
        hasher.update(escrow_id.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn build_instruction(&self, operation: &Operation) -> Value {
        let accounts = json!({
            "receipt": self.receipt_account(&operation.escrow_id),
            "oracle": self.oracle_pubkey(),
            "program": self.program_id,
        });

        match &operation.kind {
            OperationKind::Mint {
                client_wallet,
                freelancer_wallet,
                amount,
                memo,
            } => json!({
                "method": "mint_escrow_receipt",
                "accounts": accounts,
                "args": {
                    "escrow_id": operation.escrow_id,
                    "client_wallet": client_wallet,
                    "freelancer_wallet": freelancer_wallet,
                    "amount": amount,
                    "memo": memo,
                }
            }),
            OperationKind::UpdateStatus { status } => json!({
                "method": "update_escrow_status",
                "accounts": accounts,
                "args": {
                    "escrow_id": operation.escrow_id,
                    "status": status.as_str(),
                }
            }),
            OperationKind::Transfer { to_wallet } => json!({
                "method": "transfer_receipt",
                "accounts": accounts,
                "args": {
                    "escrow_id": operation.escrow_id,
                    "to_wallet": to_wallet,
                }
            }),
        }
    }

    async fn send_transaction(&self, instruction: Value) -> Result<String, SolanaError> {
        let payload = serde_json::to_vec(&instruction)?;
        let signature = self.oracle.sign(&payload);

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendTransaction",
            "params": [
                hex::encode(&payload),
                { "signature": hex::encode(signature.to_bytes()) }
            ]
        });

        let response: Value = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(SolanaError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown RPC error")
                    .to_string(),
            });
        }

        response
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                SolanaError::Submission("response carried neither result nor error".to_string())
            })
    }
}

#[async_trait::async_trait]
impl ReceiptProgram for SolanaClient {
    async fn submit(&self, operation: &Operation) -> Result<String, SolanaError> {
        let instruction = self.build_instruction(operation);
        self.send_transaction(instruction).await
    }
}

/// SHA-256 of the seed string, used directly as ed25519 key material.
pub fn derive_signing_key(seed: &str) -> SigningKey {
    let digest: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
    SigningKey::from_bytes(&digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solana::types::ReceiptStatus;
    use std::time::Duration;

    fn client() -> SolanaClient {
        SolanaClient::new(&SolanaConfig {
            cluster: "devnet".into(),
            rpc_url: "http://localhost:8899".into(),
            program_id: "Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS".into(),
            oracle_seed: "trustlens-oracle-sync".into(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn oracle_key_is_deterministic() {
        assert_eq!(
            derive_signing_key("seed-a").verifying_key(),
            derive_signing_key("seed-a").verifying_key()
        );
        assert_ne!(
            derive_signing_key("seed-a").verifying_key(),
            derive_signing_key("seed-b").verifying_key()
        );
    }

    #[test]
    fn receipt_account_is_stable_per_escrow() {
        let client = client();
        assert_eq!(client.receipt_account("E1"), client.receipt_account("E1"));
        assert_ne!(client.receipt_account("E1"), client.receipt_account("E2"));
    }

    #[test]
    fn instructions_carry_the_expected_method() {
        let client = client();
        let mint = Operation::new(
            "E1",
            OperationKind::Mint {
                client_wallet: "w1".into(),
                freelancer_wallet: "w2".into(),
                amount: 100,
                memo: "Escrow deal #E1".into(),
            },
        );
        let update = Operation::new(
            "E1",
            OperationKind::UpdateStatus {
                status: ReceiptStatus::Released,
            },
        );

        let mint_ix = client.build_instruction(&mint);
        assert_eq!(mint_ix["method"], "mint_escrow_receipt");
        assert_eq!(mint_ix["args"]["amount"], 100);

        let update_ix = client.build_instruction(&update);
        assert_eq!(update_ix["method"], "update_escrow_status");
        assert_eq!(update_ix["args"]["status"], "released");
    }
}
