//! A single worker — one receive-process-delete loop plus a utilization
//! ticker.
//!
//! Workers never abandon a received message: every message is either
//! deleted (handler succeeded) or has its visibility reset (handler
//! failed) before the loop moves on, and stop signals are only honored
//! between polls.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sluice_metrics::MetricsEngine;
use sluice_queue::{QueueClient, QueueMessage, ReceiveRequest};

use crate::config::ConsumerTiming;

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Per-message processing callback. Business logic plugs in here; the
/// worker only drives the queue cycle around it.
pub type MessageHandler = Arc<dyn Fn(QueueMessage) -> BoxFuture + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(QueueMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Worker-owned counters. Single writer per field (the worker's own
/// tasks); the pool reads `is_processing` for utilization reporting.
pub(crate) struct WorkerState {
    is_processing: AtomicBool,
    processed_in_window: AtomicU64,
    /// Unix seconds at the start of the current utilization window.
    window_start: AtomicU64,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            is_processing: AtomicBool::new(false),
            processed_in_window: AtomicU64::new(0),
            window_start: AtomicU64::new(epoch_secs()),
        }
    }

    pub(crate) fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::Acquire)
    }

    fn set_processing(&self, value: bool) {
        self.is_processing.store(value, Ordering::Release);
    }

    fn add_processed(&self) {
        self.processed_in_window.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically close the current window: returns (processed, elapsed
    /// seconds) and resets both fields for the next window.
    fn take_window(&self, now: u64) -> (u64, u64) {
        let started = self.window_start.swap(now, Ordering::AcqRel);
        let processed = self.processed_in_window.swap(0, Ordering::AcqRel);
        (processed, now.saturating_sub(started))
    }

    #[cfg(test)]
    pub(crate) fn processed_in_window(&self) -> u64 {
        self.processed_in_window.load(Ordering::Relaxed)
    }
}

/// Everything a worker needs besides its identity. The pool holds one
/// and clones it per spawned worker.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub client: Arc<dyn QueueClient>,
    pub queue_url: String,
    pub metrics: MetricsEngine,
    pub handler: MessageHandler,
    pub processing_time: Duration,
    pub timing: ConsumerTiming,
}

/// Pool-side handle to a running worker.
pub(crate) struct WorkerHandle {
    pub state: Arc<WorkerState>,
    pub stop_tx: watch::Sender<bool>,
    pub handle: JoinHandle<()>,
}

/// Spawn a worker's poll loop and utilization ticker. Both tasks exit on
/// the per-worker stop signal or the ambient shutdown.
pub(crate) fn spawn_worker(
    id: String,
    ctx: WorkerContext,
    shutdown: watch::Receiver<bool>,
) -> WorkerHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let state = Arc::new(WorkerState::new());

    let ticker_state = Arc::clone(&state);
    let ticker_metrics = ctx.metrics.clone();
    let ticker_interval = ctx.timing.utilization_interval;
    let ticker_stop = stop_rx.clone();
    let ticker_shutdown = shutdown.clone();
    tokio::spawn(async move {
        run_utilization_ticker(
            ticker_state,
            ticker_metrics,
            ticker_interval,
            ticker_stop,
            ticker_shutdown,
        )
        .await;
    });

    let worker = Worker {
        id,
        ctx,
        state: Arc::clone(&state),
    };
    let handle = tokio::spawn(async move {
        worker.run(stop_rx, shutdown).await;
    });

    WorkerHandle {
        state,
        stop_tx,
        handle,
    }
}

struct Worker {
    id: String,
    ctx: WorkerContext,
    state: Arc<WorkerState>,
}

impl Worker {
    async fn run(self, stop: watch::Receiver<bool>, shutdown: watch::Receiver<bool>) {
        debug!(worker_id = %self.id, "worker started");

        loop {
            // Honored at poll completion — never mid-message.
            if *stop.borrow() || *shutdown.borrow() {
                break;
            }

            let request = ReceiveRequest {
                max_messages: self.ctx.timing.receive_batch,
                wait_seconds: self.ctx.timing.receive_wait.as_secs() as u32,
                visibility_seconds: self.ctx.processing_time.as_secs() as u32,
            };

            match self.ctx.client.receive(&self.ctx.queue_url, request).await {
                Ok(messages) => {
                    for message in messages {
                        self.process(message).await;
                    }
                }
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "poll failed");
                    self.ctx.metrics.record_error("poll_error").await;
                    tokio::time::sleep(self.ctx.timing.poll_backoff).await;
                }
            }
        }

        debug!(worker_id = %self.id, "worker stopped");
    }

    async fn process(&self, message: QueueMessage) {
        let started = Instant::now();
        self.state.set_processing(true);

        match (self.ctx.handler)(message.clone()).await {
            Ok(()) => {
                if let Err(e) = self
                    .ctx
                    .client
                    .delete(&self.ctx.queue_url, &message.receipt_token)
                    .await
                {
                    warn!(
                        worker_id = %self.id,
                        message_id = %message.id,
                        error = %e,
                        "failed to delete message"
                    );
                    self.ctx.metrics.record_error("delete_error").await;
                }
                self.state.add_processed();
            }
            Err(e) => {
                warn!(
                    worker_id = %self.id,
                    message_id = %message.id,
                    error = %e,
                    "message processing failed"
                );
                self.ctx.metrics.record_error("processing_error").await;

                // Reset visibility so the queue redelivers. If the reset
                // itself fails, the original reservation will still lapse.
                if let Err(e) = self
                    .ctx
                    .client
                    .change_visibility(
                        &self.ctx.queue_url,
                        &message.receipt_token,
                        self.ctx.timing.failure_visibility.as_secs() as u32,
                    )
                    .await
                {
                    warn!(
                        worker_id = %self.id,
                        message_id = %message.id,
                        error = %e,
                        "failed to reset message visibility"
                    );
                }
            }
        }

        self.state.set_processing(false);
        self.ctx.metrics.record_processing_time(started.elapsed()).await;
    }
}

/// Every window, read-and-reset the processed counter and publish the
/// messages-per-second proxy, capped at 100.
async fn run_utilization_ticker(
    state: Arc<WorkerState>,
    metrics: MetricsEngine,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let (processed, elapsed) = state.take_window(epoch_secs());
                if elapsed == 0 {
                    continue;
                }
                let utilization = utilization_percent(processed, elapsed);
                metrics.record_worker_utilization(utilization).await;
            }
            _ = stop.changed() => break,
            _ = shutdown.changed() => break,
        }
    }
}

/// Messages-per-second scaled to percent, saturating at 100.
fn utilization_percent(processed: u64, elapsed_secs: u64) -> f64 {
    let raw = processed as f64 / elapsed_secs as f64 * 100.0;
    raw.min(100.0)
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
