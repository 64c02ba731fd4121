//! Bounded-concurrency execution queue for target-ledger operations.
//!
//! Operations enter a FIFO queue and are drained in batches of at most
//! `min(batch_size, max_concurrent_operations)` on a fixed tick. A batch
//! settles fully (every operation succeeds or fails independently) before the
//! next one is drained, so peak concurrency never exceeds the configured cap.
//!
//! Failures are retried with a linear backoff of `retry_delay × retry_count`.
//! Once an operation has failed `retry_attempts` times it is permanently
//! failed: removed from the pending set exactly once, rejected on its
//! completion handle, and reported to the orchestrator.
//!
//! Pending work is tracked per escrow as an ordered sub-queue, so a second
//! operation for the same escrow never clobbers tracking for the first.

use super::client::ReceiptProgram;
use super::types::{
    CompletionHandle, Operation, OperationError, OperationReport, QueueStatus,
};
use crate::config::SyncConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

struct QueuedOp {
    id: u64,
    op: Operation,
    done: oneshot::Sender<Result<String, OperationError>>,
}

struct Inner {
    queue: VecDeque<QueuedOp>,
    /// Per-escrow ordered sub-queues of operation ids that are queued or
    /// executing.
    pending: HashMap<String, VecDeque<u64>>,
    pending_count: usize,
}

/// Executes receipt-program operations with bounded concurrency and retry.
pub struct OperationDispatcher {
    program: Arc<dyn ReceiptProgram>,
    config: SyncConfig,
    inner: Mutex<Inner>,
    reports: mpsc::Sender<OperationReport>,
    next_id: AtomicU64,
}

impl OperationDispatcher {
    pub fn new(
        program: Arc<dyn ReceiptProgram>,
        config: SyncConfig,
        reports: mpsc::Sender<OperationReport>,
    ) -> Self {
        Self {
            program,
            config,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                pending: HashMap::new(),
                pending_count: 0,
            }),
            reports,
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue an operation for execution. The returned handle resolves exactly
    /// once, when the operation reaches a terminal state.
    pub fn enqueue(&self, op: Operation) -> CompletionHandle {
        let (done_tx, done_rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        debug!(
            escrow_id = %op.escrow_id,
            kind = op.kind.label(),
            "operation queued"
        );

        let mut inner = self.inner.lock().unwrap();
        inner
            .pending
            .entry(op.escrow_id.clone())
            .or_default()
            .push_back(id);
        inner.pending_count += 1;
        inner.queue.push_back(QueuedOp {
            id,
            op,
            done: done_tx,
        });

        CompletionHandle::new(done_rx)
    }

    /// Queue snapshot for the external health probe.
    pub fn queue_status(&self) -> QueueStatus {
        let inner = self.inner.lock().unwrap();
        QueueStatus {
            queue_length: inner.queue.len(),
            pending_count: inner.pending_count,
            max_concurrent: self.config.max_concurrent_operations,
        }
    }

    /// Run the dispatch tick until shutdown. An in-flight batch always
    /// settles before the loop observes the shutdown flag.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.dispatch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            batch_size = self.config.batch_size,
            max_concurrent = self.config.max_concurrent_operations,
            retry_attempts = self.config.retry_attempts,
            "operation dispatcher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.dispatch_batch().await,
            }
        }
        info!("operation dispatcher stopped");
    }

    /// Drain one batch off the queue front and run it concurrently, waiting
    /// for the whole batch to settle.
    async fn dispatch_batch(self: &Arc<Self>) {
        let batch: Vec<QueuedOp> = {
            let mut inner = self.inner.lock().unwrap();
            let take = self
                .config
                .batch_size
                .min(self.config.max_concurrent_operations)
                .min(inner.queue.len());
            inner.queue.drain(..take).collect()
        };

        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), "dispatching operation batch");

        let executions = batch.into_iter().map(|queued| {
            let this = Arc::clone(self);
            async move { this.execute(queued).await }
        });
        futures::future::join_all(executions).await;
    }

    async fn execute(self: Arc<Self>, mut queued: QueuedOp) {
        let escrow_id = queued.op.escrow_id.clone();
        let kind = queued.op.kind.clone();

        match self.program.submit(&queued.op).await {
            Ok(signature) => {
                self.remove_pending(&escrow_id, queued.id);
                info!(
                    escrow_id = %escrow_id,
                    kind = kind.label(),
                    tx = %signature,
                    retries = queued.op.retry_count,
                    "operation completed"
                );
                let _ = self
                    .reports
                    .send(OperationReport {
                        escrow_id,
                        kind,
                        retry_count: queued.op.retry_count,
                        result: Ok(signature.clone()),
                    })
                    .await;
                let _ = queued.done.send(Ok(signature));
            }
            Err(e) => {
                queued.op.retry_count += 1;
                let attempts = queued.op.retry_count;

                if attempts < self.config.retry_attempts {
                    let delay = self.config.retry_delay * attempts;
                    warn!(
                        escrow_id = %escrow_id,
                        kind = kind.label(),
                        error = %e,
                        attempt = attempts,
                        max = self.config.retry_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "operation failed, re-queueing"
                    );
                    // Back on the queue front after the backoff delay; the
                    // pending registration is retained meanwhile.
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        sleep(delay).await;
                        this.inner.lock().unwrap().queue.push_front(queued);
                    });
                } else {
                    self.remove_pending(&escrow_id, queued.id);
                    let reason = e.to_string();
                    error!(
                        escrow_id = %escrow_id,
                        kind = kind.label(),
                        attempts,
                        error = %reason,
                        "operation permanently failed"
                    );
                    let _ = self
                        .reports
                        .send(OperationReport {
                            escrow_id,
                            kind,
                            retry_count: attempts,
                            result: Err(reason.clone()),
                        })
                        .await;
                    let _ = queued
                        .done
                        .send(Err(OperationError::RetryExhausted { attempts, reason }));
                }
            }
        }
    }

    fn remove_pending(&self, escrow_id: &str, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(sub_queue) = inner.pending.get_mut(escrow_id) {
            if let Some(position) = sub_queue.iter().position(|entry| *entry == id) {
                sub_queue.remove(position);
                if sub_queue.is_empty() {
                    inner.pending.remove(escrow_id);
                }
                inner.pending_count -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solana::types::{OperationKind, ReceiptStatus, SolanaError};
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::time::Duration;

    struct MockProgram {
        /// Number of leading calls that fail.
        fail_first: AtomicU32,
        calls: AtomicU32,
        concurrent: AtomicUsize,
        peak_concurrent: AtomicUsize,
        started: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl MockProgram {
        fn new(fail_first: u32, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                fail_first: AtomicU32::new(fail_first),
                calls: AtomicU32::new(0),
                concurrent: AtomicUsize::new(0),
                peak_concurrent: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
                delay,
            })
        }
    }

    #[async_trait::async_trait]
    impl ReceiptProgram for MockProgram {
        async fn submit(&self, operation: &Operation) -> Result<String, SolanaError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_concurrent.fetch_max(now, Ordering::SeqCst);
            self.started
                .lock()
                .unwrap()
                .push(operation.escrow_id.clone());

            sleep(self.delay).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);

            if call <= self.fail_first.load(Ordering::SeqCst) {
                Err(SolanaError::Submission(format!("injected failure {call}")))
            } else {
                Ok(format!("sig_{call}"))
            }
        }
    }

    fn test_config(batch_size: usize, max_concurrent: usize, retry_attempts: u32) -> SyncConfig {
        SyncConfig {
            batch_size,
            retry_attempts,
            retry_delay: Duration::from_millis(1),
            max_concurrent_operations: max_concurrent,
            dispatch_interval: Duration::from_millis(5),
        }
    }

    fn mint_op(escrow_id: &str) -> Operation {
        Operation::new(
            escrow_id,
            OperationKind::Mint {
                client_wallet: "w_client".into(),
                freelancer_wallet: "w_freelancer".into(),
                amount: 100,
                memo: format!("Escrow deal #{escrow_id}"),
            },
        )
    }

    struct Harness {
        dispatcher: Arc<OperationDispatcher>,
        reports: mpsc::Receiver<OperationReport>,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(program: Arc<MockProgram>, config: SyncConfig) -> Harness {
        let (report_tx, reports) = mpsc::channel(64);
        let dispatcher = Arc::new(OperationDispatcher::new(program, config, report_tx));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&dispatcher).run(shutdown_rx));
        Harness {
            dispatcher,
            reports,
            shutdown,
            task,
        }
    }

    impl Harness {
        async fn stop(self) {
            self.shutdown.send(true).unwrap();
            self.task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        // Fails on attempts 1 and 2, succeeds on attempt 3 with max 3.
        let program = MockProgram::new(2, Duration::from_millis(1));
        let mut harness = start(program, test_config(10, 5, 3));

        let handle = harness.dispatcher.enqueue(mint_op("E1"));
        let signature = handle.wait().await.unwrap();
        assert_eq!(signature, "sig_3");

        let report = harness.reports.recv().await.unwrap();
        assert_eq!(report.escrow_id, "E1");
        assert_eq!(report.retry_count, 2);
        assert!(report.result.is_ok());

        assert_eq!(harness.dispatcher.queue_status().pending_count, 0);
        harness.stop().await;
    }

    #[tokio::test]
    async fn retry_exhaustion_is_terminal_exactly_once() {
        let program = MockProgram::new(u32::MAX, Duration::from_millis(1));
        let mut harness = start(Arc::clone(&program), test_config(10, 5, 3));

        let handle = harness.dispatcher.enqueue(mint_op("E1"));
        match handle.wait().await {
            Err(OperationError::RetryExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected retry exhaustion, got {other:?}"),
        }
        assert_eq!(program.calls.load(Ordering::SeqCst), 3);

        let report = harness.reports.recv().await.unwrap();
        assert!(report.result.is_err());
        assert_eq!(report.retry_count, 3);

        // Removed from the pending set exactly once, with no extra reports.
        assert_eq!(harness.dispatcher.queue_status().pending_count, 0);
        assert!(harness.reports.try_recv().is_err());
        harness.stop().await;
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_configured_cap() {
        let program = MockProgram::new(0, Duration::from_millis(20));
        let mut harness = start(Arc::clone(&program), test_config(10, 3, 3));

        let handles: Vec<_> = (0..10)
            .map(|i| harness.dispatcher.enqueue(mint_op(&format!("E{i}"))))
            .collect();
        for handle in handles {
            handle.wait().await.unwrap();
        }

        assert!(program.peak_concurrent.load(Ordering::SeqCst) <= 3);
        for _ in 0..10 {
            assert!(harness.reports.recv().await.unwrap().result.is_ok());
        }
        harness.stop().await;
    }

    #[tokio::test]
    async fn batches_preserve_fifo_order() {
        let program = MockProgram::new(0, Duration::from_millis(1));
        let mut harness = start(Arc::clone(&program), test_config(2, 2, 3));

        let handles: Vec<_> = ["E1", "E2", "E3", "E4"]
            .iter()
            .map(|id| harness.dispatcher.enqueue(mint_op(id)))
            .collect();
        for handle in handles {
            handle.wait().await.unwrap();
        }

        assert_eq!(
            *program.started.lock().unwrap(),
            vec!["E1", "E2", "E3", "E4"]
        );
        for _ in 0..4 {
            harness.reports.recv().await.unwrap();
        }
        harness.stop().await;
    }

    #[tokio::test]
    async fn same_escrow_operations_are_tracked_independently() {
        let program = MockProgram::new(0, Duration::from_millis(5));
        let mut harness = start(program, test_config(10, 5, 3));

        let first = harness.dispatcher.enqueue(mint_op("E1"));
        let second = harness.dispatcher.enqueue(Operation::new(
            "E1",
            OperationKind::UpdateStatus {
                status: ReceiptStatus::Released,
            },
        ));
        assert_eq!(harness.dispatcher.queue_status().pending_count, 2);

        // Both handles resolve; neither overwrote the other's tracking.
        first.wait().await.unwrap();
        second.wait().await.unwrap();
        assert_eq!(harness.dispatcher.queue_status().pending_count, 0);
        harness.stop().await;
    }
}
