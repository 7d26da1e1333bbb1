//! The consumer — owns the worker pool.
//!
//! `start` brings up the initial workers, the queue-depth monitor, and
//! the pool-metrics reporter. The scaler drives `add_worker` and
//! `remove_worker`; both enforce the pool bounds under one exclusive
//! lock. A removed worker finishes its current message before exiting.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use sluice_metrics::{names, MetricUnit, MetricsEngine};
use sluice_queue::{
    QueueClient, ATTR_APPROXIMATE_MESSAGES, ATTR_APPROXIMATE_MESSAGES_NOT_VISIBLE,
};

use crate::config::{ConsumerConfig, ConsumerTiming};
use crate::error::ConsumerError;
use crate::worker::{spawn_worker, MessageHandler, WorkerContext, WorkerHandle};

pub struct Consumer {
    config: ConsumerConfig,
    ctx: WorkerContext,
    /// Live workers by id. Exclusive for add/remove/shutdown, shared for
    /// the metrics reporter.
    workers: RwLock<HashMap<String, WorkerHandle>>,
    shutdown: watch::Receiver<bool>,
}

impl Consumer {
    pub fn new(
        client: Arc<dyn QueueClient>,
        metrics: MetricsEngine,
        handler: MessageHandler,
        config: ConsumerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let ctx = WorkerContext {
            client,
            queue_url: config.queue_url.clone(),
            metrics,
            handler,
            processing_time: config.processing_time,
            timing: ConsumerTiming::default(),
        };
        Self {
            config,
            ctx,
            workers: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Override loop cadences. Call before `start`.
    pub fn with_timing(mut self, timing: ConsumerTiming) -> Self {
        self.ctx.timing = timing;
        self
    }

    /// Spawn the initial workers, the queue-depth monitor, and the
    /// pool-metrics reporter. If any initial worker cannot be created,
    /// already-created workers are stopped and the error is surfaced.
    pub async fn start(self: &Arc<Self>) -> Result<(), ConsumerError> {
        self.config.validate()?;

        for _ in 0..self.config.initial_workers {
            if let Err(e) = self.add_worker().await {
                error!(error = %e, "failed to start initial workers");
                self.shutdown().await;
                return Err(ConsumerError::Startup(Box::new(e)));
            }
        }

        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.monitor_queue_depth().await });

        let reporter = Arc::clone(self);
        tokio::spawn(async move { reporter.report_pool_metrics().await });

        info!(
            queue_url = %self.config.queue_url,
            initial = self.config.initial_workers,
            min = self.config.min_workers,
            max = self.config.max_workers,
            "consumer started"
        );
        Ok(())
    }

    /// Add one worker. Fails with `MaxWorkersReached` at the upper bound.
    pub async fn add_worker(&self) -> Result<(), ConsumerError> {
        let mut workers = self.workers.write().await;
        if workers.len() >= self.config.max_workers {
            return Err(ConsumerError::MaxWorkersReached);
        }

        let id = Uuid::new_v4().to_string();
        let handle = spawn_worker(id.clone(), self.ctx.clone(), self.shutdown.clone());
        workers.insert(id.clone(), handle);

        info!(worker_id = %id, pool_size = workers.len(), "worker added");
        Ok(())
    }

    /// Stop and remove one worker. Fails with `MinWorkersReached` at the
    /// lower bound. Victim selection is whatever the map yields first —
    /// no ordering guarantee. The stopped worker completes its current
    /// message before exiting.
    pub async fn remove_worker(&self) -> Result<(), ConsumerError> {
        let mut workers = self.workers.write().await;
        if workers.len() <= self.config.min_workers {
            return Err(ConsumerError::MinWorkersReached);
        }

        let Some(id) = workers.keys().next().cloned() else {
            return Err(ConsumerError::MinWorkersReached);
        };
        if let Some(slot) = workers.remove(&id) {
            let _ = slot.stop_tx.send(true);
        }

        info!(worker_id = %id, pool_size = workers.len(), "worker removed");
        Ok(())
    }

    /// Raise stop on every worker. Returns once all signals are raised;
    /// workers drain their current message and exit at their next
    /// suspension point.
    pub async fn shutdown(&self) {
        let workers = self.workers.write().await;
        for slot in workers.values() {
            let _ = slot.stop_tx.send(true);
        }
        info!(workers = workers.len(), "consumer shutdown, stop raised on all workers");
    }

    /// Current pool size.
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Every tick, fetch approximate queue depths and publish them.
    /// Transient failures are counted and skipped.
    async fn monitor_queue_depth(&self) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.ctx.timing.queue_depth_interval) => {
                    self.fetch_queue_depth().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn fetch_queue_depth(&self) {
        let attrs = match self
            .ctx
            .client
            .get_attributes(
                &self.ctx.queue_url,
                &[ATTR_APPROXIMATE_MESSAGES, ATTR_APPROXIMATE_MESSAGES_NOT_VISIBLE],
            )
            .await
        {
            Ok(attrs) => attrs,
            Err(e) => {
                warn!(error = %e, "queue depth fetch failed");
                self.ctx.metrics.record_error("queue_depth_fetch_error").await;
                return;
            }
        };

        if let Some(raw) = attrs.get(ATTR_APPROXIMATE_MESSAGES) {
            match raw.parse::<u64>() {
                Ok(depth) => self.ctx.metrics.record_queue_depth(depth).await,
                Err(_) => {
                    self.ctx
                        .metrics
                        .record_error("queue_depth_parse_error")
                        .await
                }
            }
        }

        if let Some(raw) = attrs.get(ATTR_APPROXIMATE_MESSAGES_NOT_VISIBLE) {
            match raw.parse::<u64>() {
                Ok(in_flight) => {
                    self.ctx
                        .metrics
                        .record(names::IN_FLIGHT_MESSAGES, in_flight as f64, MetricUnit::Count)
                        .await
                }
                Err(_) => {
                    self.ctx
                        .metrics
                        .record_error("in_flight_messages_parse_error")
                        .await
                }
            }
        }
    }

    /// Every tick, publish the pool size and the busy fraction as
    /// pool-level utilization.
    async fn report_pool_metrics(&self) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.ctx.timing.pool_report_interval) => {
                    let (total, active) = {
                        let workers = self.workers.read().await;
                        let total = workers.len();
                        let active = workers
                            .values()
                            .filter(|slot| slot.state.is_processing())
                            .count();
                        (total, active)
                    };

                    self.ctx
                        .metrics
                        .record(names::WORKER_COUNT, total as f64, MetricUnit::Count)
                        .await;
                    if total > 0 {
                        let utilization = active as f64 / total as f64 * 100.0;
                        self.ctx.metrics.record_worker_utilization(utilization).await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn all_workers_finished(&self) -> bool {
        let workers = self.workers.read().await;
        !workers.is_empty() && workers.values().all(|slot| slot.handle.is_finished())
    }
}
