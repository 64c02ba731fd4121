//! Sync orchestrator: wires source-ledger events to mapping updates and
//! target-ledger operations.
//!
//! The orchestrator owns all mapping writes and the aggregate statistics. It
//! consumes two channels — normalized events from the listener and terminal
//! operation reports from the dispatcher — and never lets a failure escape:
//! every error is logged with its escrow context and absorbed.

use crate::aeternity::{AeternityError, AeternityRpc, EventKind, NormalizedEvent};
use crate::solana::{
    CompletionHandle, Operation, OperationDispatcher, OperationKind, OperationReport,
    ReceiptStatus,
};
use crate::sync::address::AddressMapper;
use crate::sync::mappings::{EscrowMapping, MappingError, MappingStatus, MappingStore};
use crate::sync::stats::{StatsTracker, SyncStats};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Errors surfaced while applying one event or report. Always caught and
/// logged inside the orchestrator's loop.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("source ledger query failed: {0}")]
    Source(#[from] AeternityError),
}

pub struct SyncOrchestrator {
    store: Arc<MappingStore>,
    dispatcher: Arc<OperationDispatcher>,
    source: Arc<dyn AeternityRpc>,
    addresses: Arc<dyn AddressMapper>,
    stats: Mutex<StatsTracker>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<MappingStore>,
        dispatcher: Arc<OperationDispatcher>,
        source: Arc<dyn AeternityRpc>,
        addresses: Arc<dyn AddressMapper>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            source,
            addresses,
            stats: Mutex::new(StatsTracker::new()),
        }
    }

    /// Aggregate statistics, with `pending_operations` mirrored live from
    /// the dispatcher.
    pub fn stats(&self) -> SyncStats {
        let pending = self.dispatcher.queue_status().pending_count;
        self.stats.lock().unwrap().snapshot(pending)
    }

    pub async fn mappings(&self) -> Result<Vec<EscrowMapping>, MappingError> {
        self.store.list_all().await
    }

    /// Consume events and operation reports until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<NormalizedEvent>,
        mut reports: mpsc::Receiver<OperationReport>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("sync orchestrator started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                report = reports.recv() => match report {
                    Some(report) => self.handle_report(report).await,
                    None => break,
                },
            }
        }
        info!("sync orchestrator stopped");
    }

    /// Apply one inbound event. Every event counts toward `total_events`,
    /// handled or not; failures are logged with their escrow context.
    pub(crate) async fn handle_event(&self, event: NormalizedEvent) {
        self.stats.lock().unwrap().record_event();
        debug!(
            kind = event.kind.as_str(),
            escrow_id = event.escrow_id(),
            tx_hash = %event.tx_hash,
            block_height = event.block_height,
            "handling escrow event"
        );

        let result = match event.kind {
            EventKind::Deposited => self.handle_deposited(&event).await,
            EventKind::Released => self.handle_lifecycle(&event, ReceiptStatus::Released).await,
            EventKind::Disputed => self.handle_lifecycle(&event, ReceiptStatus::Disputed).await,
            EventKind::Refunded => self.handle_lifecycle(&event, ReceiptStatus::Refunded).await,
        };

        if let Err(e) = result {
            error!(
                kind = event.kind.as_str(),
                escrow_id = event.escrow_id(),
                tx_hash = %event.tx_hash,
                error = %e,
                "failed to handle escrow event"
            );
        }
    }

    /// First deposit creates the mapping and queues the receipt mint.
    /// Duplicate deposits for a known escrow are no-ops.
    async fn handle_deposited(&self, event: &NormalizedEvent) -> Result<(), SyncError> {
        let escrow_id = event.escrow_id().to_string();

        if self.store.get(&escrow_id).await?.is_some() {
            debug!(escrow_id = %escrow_id, "mapping already exists, skipping mint");
            return Ok(());
        }

        let escrow = self.source.escrow_state(&event.contract_address).await?;
        let client_wallet = self.addresses.to_target_address(&escrow.client);
        let freelancer_wallet = self.addresses.to_target_address(&escrow.freelancer);

        let created = self
            .store
            .create_if_absent(EscrowMapping::new(
                &escrow_id,
                &client_wallet,
                &freelancer_wallet,
            ))
            .await?;
        if !created {
            return Ok(());
        }

        let amount: u64 = event
            .payload
            .amount
            .as_deref()
            .unwrap_or(&escrow.amount)
            .parse()
            .unwrap_or(0);

        info!(escrow_id = %escrow_id, amount, "minting receipt for new escrow");
        self.dispatcher.enqueue(Operation::new(
            &escrow_id,
            OperationKind::Mint {
                client_wallet,
                freelancer_wallet,
                amount,
                memo: format!("Escrow deal #{escrow_id}"),
            },
        ));
        Ok(())
    }

    /// Release, dispute, and refund all require an existing mapping and map
    /// to a status update on the receipt token.
    async fn handle_lifecycle(
        &self,
        event: &NormalizedEvent,
        status: ReceiptStatus,
    ) -> Result<(), SyncError> {
        let escrow_id = event.escrow_id();

        if self.store.get(escrow_id).await?.is_none() {
            warn!(
                escrow_id,
                kind = event.kind.as_str(),
                "no mapping for escrow, skipping status update"
            );
            return Ok(());
        }

        // A rejected write means the mapping cannot take an update (it is
        // Failed and no receipt was ever minted); submitting would target a
        // receipt that does not exist.
        let advanced = self
            .store
            .update_status(escrow_id, MappingStatus::Updating)
            .await?;
        if !advanced {
            warn!(
                escrow_id,
                kind = event.kind.as_str(),
                "mapping cannot take a status update, skipping dispatch"
            );
            return Ok(());
        }

        self.dispatcher.enqueue(Operation::new(
            escrow_id,
            OperationKind::UpdateStatus { status },
        ));
        Ok(())
    }

    /// Hand an escrow's receipt to another wallet on the target ledger,
    /// typically after a release. Returns `None` when no mapping exists for
    /// the escrow.
    pub async fn transfer_receipt(
        &self,
        escrow_id: &str,
        to_wallet: impl Into<String>,
    ) -> Result<Option<CompletionHandle>, MappingError> {
        if self.store.get(escrow_id).await?.is_none() {
            warn!(escrow_id, "transfer requested for unknown escrow");
            return Ok(None);
        }

        let to_wallet = to_wallet.into();
        info!(escrow_id, to_wallet = %to_wallet, "transferring receipt");
        Ok(Some(self.dispatcher.enqueue(Operation::new(
            escrow_id,
            OperationKind::Transfer { to_wallet },
        ))))
    }

    /// Apply one terminal operation report from the dispatcher.
    pub(crate) async fn handle_report(&self, report: OperationReport) {
        let result = self.apply_report(&report).await;
        if let Err(e) = result {
            error!(
                escrow_id = %report.escrow_id,
                kind = report.kind.label(),
                error = %e,
                "failed to apply operation report"
            );
        }
    }

    async fn apply_report(&self, report: &OperationReport) -> Result<(), SyncError> {
        match &report.result {
            Ok(signature) => {
                self.stats.lock().unwrap().record_success();
                match &report.kind {
                    OperationKind::Mint { .. } => {
                        self.store
                            .set_target_receipt(&report.escrow_id, signature)
                            .await?;
                        // A lifecycle event may have overtaken the mint
                        // report; only advance when the mapping is still
                        // waiting on the mint.
                        if let Some(mapping) = self.store.get(&report.escrow_id).await? {
                            if mapping.status == MappingStatus::Minting {
                                self.store
                                    .update_status(&report.escrow_id, MappingStatus::Minted)
                                    .await?;
                            }
                        }
                    }
                    OperationKind::UpdateStatus { .. } => {
                        self.store
                            .update_status(&report.escrow_id, MappingStatus::Completed)
                            .await?;
                    }
                    // Ownership change only; the mapping is unaffected.
                    OperationKind::Transfer { .. } => {}
                }
                info!(
                    escrow_id = %report.escrow_id,
                    kind = report.kind.label(),
                    tx = %signature,
                    retries = report.retry_count,
                    "operation settled"
                );
            }
            Err(reason) => {
                self.stats.lock().unwrap().record_failure();
                self.store
                    .update_status(&report.escrow_id, MappingStatus::Failed)
                    .await?;
                error!(
                    escrow_id = %report.escrow_id,
                    kind = report.kind.label(),
                    attempts = report.retry_count,
                    error = %reason,
                    "operation permanently failed"
                );
            }
        }
        Ok(())
    }
}
