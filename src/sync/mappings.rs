//! Escrow-to-receipt mapping store.
//!
//! One mapping exists per source escrow id for the lifetime of the escrow:
//! created on the first `Deposited` event, mutated by every later event's
//! handler, never deleted in normal operation. Status moves forward only:
//! `Completed → Updating` re-enters when a later lifecycle event arrives,
//! a lifecycle event may overtake the mint report (`Minting → Updating`),
//! and `Failed` is reachable from anywhere.
//!
//! Storage sits behind `MappingRepository` so a durable backend can be
//! injected without changing orchestrator logic. All writes go through the
//! orchestrator; snapshots are read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Lifecycle of a mapping between an escrow and its receipt token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingStatus {
    Minting,
    Minted,
    Updating,
    Completed,
    Failed,
}

impl MappingStatus {
    /// Whether moving to `next` is forward progress in the state machine.
    pub fn can_advance_to(self, next: MappingStatus) -> bool {
        use MappingStatus::*;
        if next == Failed {
            return self != Failed;
        }
        matches!(
            (self, next),
            (Minting, Minted)
                | (Minting, Updating)
                | (Minted, Updating)
                | (Minted, Completed)
                | (Updating, Completed)
                | (Completed, Updating)
        )
    }
}

/// Synchronization state of one escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowMapping {
    pub source_escrow_id: String,
    /// Receipt identity on the target ledger; empty until the mint settles.
    pub target_receipt_id: String,
    pub client_wallet: String,
    pub freelancer_wallet: String,
    pub status: MappingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowMapping {
    pub fn new(
        source_escrow_id: impl Into<String>,
        client_wallet: impl Into<String>,
        freelancer_wallet: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            source_escrow_id: source_escrow_id.into(),
            target_receipt_id: String::new(),
            client_wallet: client_wallet.into(),
            freelancer_wallet: freelancer_wallet.into(),
            status: MappingStatus::Minting,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Errors from the mapping storage backend.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("mapping storage error: {0}")]
    Storage(String),
}

/// Minimal storage contract for mappings, so persistence is injectable.
#[async_trait::async_trait]
pub trait MappingRepository: Send + Sync {
    async fn put(&self, mapping: EscrowMapping) -> Result<(), MappingError>;
    async fn get(&self, escrow_id: &str) -> Result<Option<EscrowMapping>, MappingError>;
    async fn list(&self) -> Result<Vec<EscrowMapping>, MappingError>;
}

/// Default repository: a process-local map, lost on restart.
#[derive(Default)]
pub struct InMemoryMappingRepository {
    entries: Mutex<HashMap<String, EscrowMapping>>,
}

#[async_trait::async_trait]
impl MappingRepository for InMemoryMappingRepository {
    async fn put(&self, mapping: EscrowMapping) -> Result<(), MappingError> {
        self.entries
            .lock()
            .unwrap()
            .insert(mapping.source_escrow_id.clone(), mapping);
        Ok(())
    }

    async fn get(&self, escrow_id: &str) -> Result<Option<EscrowMapping>, MappingError> {
        Ok(self.entries.lock().unwrap().get(escrow_id).cloned())
    }

    async fn list(&self) -> Result<Vec<EscrowMapping>, MappingError> {
        Ok(self.entries.lock().unwrap().values().cloned().collect())
    }
}

/// Single-writer store of escrow mappings keyed by source escrow id.
pub struct MappingStore {
    repo: Arc<dyn MappingRepository>,
}

impl MappingStore {
    pub fn new(repo: Arc<dyn MappingRepository>) -> Self {
        Self { repo }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryMappingRepository::default()))
    }

    /// Insert the mapping unless one already exists for its escrow id.
    /// Returns `false` (and leaves the stored mapping untouched) when the id
    /// is already known, making duplicate `Deposited` events no-ops.
    pub async fn create_if_absent(&self, mapping: EscrowMapping) -> Result<bool, MappingError> {
        if self.repo.get(&mapping.source_escrow_id).await?.is_some() {
            return Ok(false);
        }
        self.repo.put(mapping).await?;
        Ok(true)
    }

    pub async fn get(&self, escrow_id: &str) -> Result<Option<EscrowMapping>, MappingError> {
        self.repo.get(escrow_id).await
    }

    /// Advance a mapping's status. Backward transitions are rejected with a
    /// warning and leave the mapping unchanged; returns whether the update
    /// was applied.
    pub async fn update_status(
        &self,
        escrow_id: &str,
        status: MappingStatus,
    ) -> Result<bool, MappingError> {
        let Some(mut mapping) = self.repo.get(escrow_id).await? else {
            warn!(escrow_id, "status update for unknown mapping");
            return Ok(false);
        };

        if mapping.status == status {
            return Ok(true);
        }
        if !mapping.status.can_advance_to(status) {
            warn!(
                escrow_id,
                from = ?mapping.status,
                to = ?status,
                "rejecting non-forward status transition"
            );
            return Ok(false);
        }

        mapping.status = status;
        mapping.updated_at = Utc::now();
        self.repo.put(mapping).await?;
        Ok(true)
    }

    /// Record the receipt identity produced by a settled mint.
    pub async fn set_target_receipt(
        &self,
        escrow_id: &str,
        receipt_id: impl Into<String>,
    ) -> Result<(), MappingError> {
        if let Some(mut mapping) = self.repo.get(escrow_id).await? {
            mapping.target_receipt_id = receipt_id.into();
            mapping.updated_at = Utc::now();
            self.repo.put(mapping).await?;
        }
        Ok(())
    }

    pub async fn list_all(&self) -> Result<Vec<EscrowMapping>, MappingError> {
        self.repo.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_if_absent_is_idempotent() {
        let store = MappingStore::in_memory();

        assert!(
            store
                .create_if_absent(EscrowMapping::new("E1", "w1", "w2"))
                .await
                .unwrap()
        );
        assert!(
            !store
                .create_if_absent(EscrowMapping::new("E1", "w_other", "w_other"))
                .await
                .unwrap()
        );

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        // The original mapping survived the duplicate create.
        assert_eq!(all[0].client_wallet, "w1");
    }

    #[tokio::test]
    async fn status_advances_through_the_lifecycle() {
        let store = MappingStore::in_memory();
        store
            .create_if_absent(EscrowMapping::new("E1", "w1", "w2"))
            .await
            .unwrap();

        for status in [
            MappingStatus::Minted,
            MappingStatus::Updating,
            MappingStatus::Completed,
        ] {
            assert!(store.update_status("E1", status).await.unwrap());
        }
        assert_eq!(
            store.get("E1").await.unwrap().unwrap().status,
            MappingStatus::Completed
        );

        // A later lifecycle event re-enters Updating from Completed.
        assert!(
            store
                .update_status("E1", MappingStatus::Updating)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn lifecycle_may_overtake_the_mint() {
        let store = MappingStore::in_memory();
        store
            .create_if_absent(EscrowMapping::new("E1", "w1", "w2"))
            .await
            .unwrap();

        assert!(
            store
                .update_status("E1", MappingStatus::Updating)
                .await
                .unwrap()
        );
        // The late mint report no longer moves the mapping back.
        assert!(
            !store
                .update_status("E1", MappingStatus::Minted)
                .await
                .unwrap()
        );
        assert!(
            store
                .update_status("E1", MappingStatus::Completed)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn backward_transitions_are_rejected() {
        let store = MappingStore::in_memory();
        store
            .create_if_absent(EscrowMapping::new("E1", "w1", "w2"))
            .await
            .unwrap();
        store
            .update_status("E1", MappingStatus::Minted)
            .await
            .unwrap();

        assert!(
            !store
                .update_status("E1", MappingStatus::Minting)
                .await
                .unwrap()
        );
        assert_eq!(
            store.get("E1").await.unwrap().unwrap().status,
            MappingStatus::Minted
        );
    }

    #[tokio::test]
    async fn failed_is_reachable_from_any_state_but_terminal() {
        let store = MappingStore::in_memory();
        store
            .create_if_absent(EscrowMapping::new("E1", "w1", "w2"))
            .await
            .unwrap();

        assert!(
            store
                .update_status("E1", MappingStatus::Failed)
                .await
                .unwrap()
        );
        assert!(
            !store
                .update_status("E1", MappingStatus::Minted)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn receipt_id_is_recorded() {
        let store = MappingStore::in_memory();
        store
            .create_if_absent(EscrowMapping::new("E1", "w1", "w2"))
            .await
            .unwrap();
        store.set_target_receipt("E1", "sig_123").await.unwrap();

        assert_eq!(
            store.get("E1").await.unwrap().unwrap().target_receipt_id,
            "sig_123"
        );
    }
}
