//! Dual-mode ingestion of escrow events from the source ledger.
//!
//! Two concurrent paths feed the same channel: a WebSocket push connection
//! for low latency, and a block-height poll that is the correctness backstop.
//! The poll path never leaves gaps: a block whose fetch fails is retried on
//! the next cycle before the cursor moves past it. A bounded recently-seen
//! window absorbs the overlap between the two paths, but consumers must still
//! tolerate at-least-once delivery.

use super::client::AeternityRpc;
use super::types::{AeternityError, ConnectionInfo, NormalizedEvent, parse_transaction_events};
use crate::config::AeternityConfig;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const SEEN_WINDOW_CAP: usize = 4096;

/// Bounded set of recently emitted event keys, evicting oldest-first.
struct SeenWindow {
    keys: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl SeenWindow {
    fn new(cap: usize) -> Self {
        assert!(cap > 0, "seen window capacity must be > 0");
        Self {
            keys: HashSet::new(),
            order: VecDeque::new(),
            cap,
        }
    }

    /// Record a key. Returns `false` when the key was already present.
    fn insert(&mut self, key: String) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        if self.order.len() == self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        self.keys.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

struct ListenerState {
    connected: bool,
    push_degraded: bool,
    reconnect_attempts: u32,
    /// Highest block height fully processed by the poll path. `None` until
    /// the first tip observation anchors the cursor.
    cursor: Option<u64>,
}

/// Event listener combining push and poll ingestion.
pub struct AeternityListener {
    config: AeternityConfig,
    rpc: Arc<dyn AeternityRpc>,
    events: mpsc::Sender<NormalizedEvent>,
    state: Mutex<ListenerState>,
    seen: Mutex<SeenWindow>,
}

impl AeternityListener {
    pub fn new(
        config: AeternityConfig,
        rpc: Arc<dyn AeternityRpc>,
        events: mpsc::Sender<NormalizedEvent>,
    ) -> Self {
        Self {
            config,
            rpc,
            events,
            state: Mutex::new(ListenerState {
                connected: false,
                push_degraded: false,
                reconnect_attempts: 0,
                cursor: None,
            }),
            seen: Mutex::new(SeenWindow::new(SEEN_WINDOW_CAP)),
        }
    }

    /// Connectivity snapshot for the external health probe.
    pub fn connection_info(&self) -> ConnectionInfo {
        let state = self.state.lock().unwrap();
        ConnectionInfo {
            connected: state.connected,
            push_degraded: state.push_degraded,
            reconnect_attempts: state.reconnect_attempts,
            last_processed_height: state.cursor.unwrap_or(0),
            contract_address: self.config.contract_address.clone(),
        }
    }

    /// Whether push delivery is currently live.
    pub fn push_healthy(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.connected && !state.push_degraded
    }

    /// Run the poll backstop until shutdown.
    pub async fn run_poll(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            contract = self.config.contract_address.as_deref().unwrap_or("<all>"),
            "starting poll ingestion"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.poll_once().await,
            }
        }
        info!("poll ingestion stopped");
    }

    /// One poll cycle: advance the cursor through every new block in order.
    async fn poll_once(&self) {
        let current = match self.rpc.current_height().await {
            Ok(height) => height,
            Err(e) => {
                warn!(error = %e, "failed to fetch current block height");
                return;
            }
        };

        let last = {
            let mut state = self.state.lock().unwrap();
            match state.cursor {
                Some(height) => height,
                None => {
                    // First observation anchors the cursor at the tip; the
                    // bridge mirrors escrows going forward, not history.
                    info!(height = current, "anchored poll cursor at current tip");
                    state.cursor = Some(current);
                    return;
                }
            }
        };

        if current <= last {
            return;
        }
        debug!(from = last, to = current, "new blocks detected");

        for height in last + 1..=current {
            match self.process_block(height).await {
                Ok(()) => {
                    self.state.lock().unwrap().cursor = Some(height);
                }
                Err(e) => {
                    // Stop the ascent so this height is retried next cycle;
                    // advancing past it would leave a gap.
                    warn!(height, error = %e, "block processing failed, will retry next cycle");
                    break;
                }
            }
        }
    }

    async fn process_block(&self, height: u64) -> Result<(), AeternityError> {
        let transactions = self.rpc.block_transactions(height).await?;
        for transaction in &transactions {
            let events =
                parse_transaction_events(transaction, self.config.contract_address.as_deref());
            for event in events {
                self.emit(event).await;
            }
        }
        Ok(())
    }

    /// Emit an event unless it was recently delivered by the other path.
    async fn emit(&self, event: NormalizedEvent) {
        let fresh = self.seen.lock().unwrap().insert(event.dedup_key());
        if !fresh {
            debug!(tx_hash = %event.tx_hash, kind = event.kind.as_str(), "suppressing duplicate event");
            return;
        }
        if self.events.send(event).await.is_err() {
            warn!("event channel closed, dropping event");
        }
    }

    /// Run the push path until shutdown, reconnecting with linear backoff.
    /// After the reconnect budget is exhausted the push path is abandoned and
    /// ingestion degrades to poll-only. Never fatal.
    pub async fn run_push(&self, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.config.ws_url, "starting push ingestion");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.push_session(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    let attempts = {
                        let mut state = self.state.lock().unwrap();
                        state.connected = false;
                        state.reconnect_attempts += 1;
                        state.reconnect_attempts
                    };

                    if attempts >= self.config.max_reconnect_attempts {
                        self.state.lock().unwrap().push_degraded = true;
                        warn!(
                            attempts,
                            "push reconnect budget exhausted, degrading to poll-only ingestion"
                        );
                        break;
                    }

                    let delay = self.config.reconnect_delay * attempts;
                    warn!(
                        error = %e,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "push connection lost, reconnecting"
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.state.lock().unwrap().connected = false;
        info!("push ingestion stopped");
    }

    /// One push connection lifetime. Returns `Ok` only on shutdown; every
    /// other way out is a reconnectable error.
    async fn push_session(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), AeternityError> {
        let (ws, _) = connect_async(self.config.ws_url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let subscribe = serde_json::json!({ "op": "Subscribe", "payload": "Transactions" });
        sink.send(Message::Text(subscribe.to_string())).await?;

        {
            let mut state = self.state.lock().unwrap();
            state.connected = true;
            state.reconnect_attempts = 0;
        }
        info!("push channel connected");

        let mut heartbeat = interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                _ = heartbeat.tick() => {
                    if last_activity.elapsed() > self.config.heartbeat_interval * 2 {
                        return Err(AeternityError::Push(
                            "no liveness response within heartbeat window".to_string(),
                        ));
                    }
                    sink.send(Message::Ping(Vec::new())).await?;
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        self.handle_push_message(&text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_activity = Instant::now();
                        sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(AeternityError::Push("connection closed by peer".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }

    async fn handle_push_message(&self, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "ignoring malformed push message");
                return;
            }
        };

        // Subscription acks and status frames carry no payload object.
        let Some(transaction) = message.get("payload").filter(|p| p.is_object()) else {
            debug!("ignoring push frame without transaction payload");
            return;
        };

        let events =
            parse_transaction_events(transaction, self.config.contract_address.as_deref());
        for event in events {
            self.emit(event).await;
        }
    }
}
