//! Bridge composition and orchestration.
//!
//! `SyncBridge` is the composition root: it builds every component from the
//! loaded configuration, wires them together over channels, and owns the
//! shutdown signal. The orchestrator and its collaborators live in the
//! submodules.

/// Source-to-target address derivation
mod address;
/// Escrow-to-receipt mapping store
mod mappings;
/// Event and report handling
mod orchestrator;
/// Aggregate statistics
mod stats;

pub use address::{AddressMapper, SeededAddressMapper};
pub use mappings::{
    EscrowMapping, InMemoryMappingRepository, MappingError, MappingRepository, MappingStatus,
    MappingStore,
};
pub use orchestrator::{SyncError, SyncOrchestrator};
pub use stats::{StatsTracker, SyncStats};

use crate::aeternity::{
    AeternityClient, AeternityError, AeternityListener, AeternityRpc, ConnectionInfo,
    NormalizedEvent,
};
use crate::config::BridgeConfig;
use crate::solana::{
    CompletionHandle, OperationDispatcher, OperationReport, QueueStatus, SolanaClient,
    SolanaError, SolanaInfo,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Errors raised while constructing the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("source ledger client error: {0}")]
    Source(#[from] AeternityError),

    #[error("target ledger client error: {0}")]
    Target(#[from] SolanaError),
}

/// Read-only snapshot of the whole bridge for the health log and any
/// external probe.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub stats: SyncStats,
    pub source: ConnectionInfo,
    pub target: SolanaInfo,
    pub queue: QueueStatus,
}

struct Inbox {
    events: mpsc::Receiver<NormalizedEvent>,
    reports: mpsc::Receiver<OperationReport>,
}

/// The assembled bridge: listener, dispatcher, and orchestrator sharing one
/// shutdown signal.
pub struct SyncBridge {
    listener: Arc<AeternityListener>,
    dispatcher: Arc<OperationDispatcher>,
    orchestrator: Arc<SyncOrchestrator>,
    target_info: SolanaInfo,
    shutdown: watch::Sender<bool>,
    inbox: Mutex<Option<Inbox>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncBridge {
    /// Build every component from configuration. Nothing runs until
    /// [`SyncBridge::start`].
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (report_tx, report_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);

        let source_rpc: Arc<dyn AeternityRpc> = Arc::new(AeternityClient::new(
            config.aeternity.rpc_url.clone(),
            config.aeternity.request_timeout,
        )?);
        let listener = Arc::new(AeternityListener::new(
            config.aeternity.clone(),
            Arc::clone(&source_rpc),
            event_tx,
        ));

        let solana = Arc::new(SolanaClient::new(&config.solana)?);
        let target_info = solana.connection_info();
        let dispatcher = Arc::new(OperationDispatcher::new(
            solana,
            config.sync.clone(),
            report_tx,
        ));

        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(MappingStore::in_memory()),
            Arc::clone(&dispatcher),
            source_rpc,
            Arc::new(SeededAddressMapper::new(config.solana.oracle_seed.clone())),
        ));

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            listener,
            dispatcher,
            orchestrator,
            target_info,
            shutdown,
            inbox: Mutex::new(Some(Inbox {
                events: event_rx,
                reports: report_rx,
            })),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the ingestion, dispatch, and orchestration tasks. Idempotent:
    /// a second call is a no-op.
    pub fn start(&self) {
        let Some(inbox) = self.inbox.lock().unwrap().take() else {
            return;
        };
        info!(
            oracle = %self.target_info.oracle_pubkey,
            program = %self.target_info.program_id,
            "starting sync bridge"
        );

        let mut tasks = self.tasks.lock().unwrap();

        let orchestrator = Arc::clone(&self.orchestrator);
        tasks.push(tokio::spawn(orchestrator.run(
            inbox.events,
            inbox.reports,
            self.shutdown.subscribe(),
        )));

        let dispatcher = Arc::clone(&self.dispatcher);
        tasks.push(tokio::spawn(dispatcher.run(self.shutdown.subscribe())));

        let poll = Arc::clone(&self.listener);
        let poll_shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            poll.run_poll(poll_shutdown).await;
        }));

        let push = Arc::clone(&self.listener);
        let push_shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            push.run_push(push_shutdown).await;
        }));
    }

    /// Signal every task to stop and wait for them to drain. In-flight
    /// dispatch batches settle before their task exits.
    pub async fn shutdown(&self) {
        info!("shutting down sync bridge");
        let _ = self.shutdown.send(true);

        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("sync bridge stopped");
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            stats: self.orchestrator.stats(),
            source: self.listener.connection_info(),
            target: self.target_info.clone(),
            queue: self.dispatcher.queue_status(),
        }
    }

    pub async fn mappings(&self) -> Result<Vec<EscrowMapping>, MappingError> {
        self.orchestrator.mappings().await
    }

    /// Hand an escrow's receipt to another wallet on the target ledger.
    /// Returns `None` when no mapping exists for the escrow.
    pub async fn transfer_receipt(
        &self,
        escrow_id: &str,
        to_wallet: &str,
    ) -> Result<Option<CompletionHandle>, MappingError> {
        self.orchestrator.transfer_receipt(escrow_id, to_wallet).await
    }
}
