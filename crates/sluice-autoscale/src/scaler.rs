//! Scaler — evaluates metrics on a tick and commands the pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::info;

use sluice_consumer::Consumer;
use sluice_metrics::{names, MetricsEngine};

/// Utilization percentage above which the pool grows.
const UTILIZATION_SCALE_UP: f64 = 75.0;

/// Utilization percentage below which the pool may shrink.
const UTILIZATION_SCALE_DOWN: f64 = 40.0;

/// Averaging window applied to processing time and utilization.
const AVERAGE_WINDOW: Duration = Duration::from_secs(60);

/// Scaling thresholds and cadence.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    /// Queue depth above which the pool grows.
    pub scale_up_threshold: f64,
    /// Queue depth below which the pool may shrink.
    pub scale_down_threshold: f64,
    /// Minimum elapsed time between the last scale event and a
    /// scale-down. Scale-up is never gated.
    pub cooldown: Duration,
    /// Processing-time target. Note the comparison quirk: the 1-minute
    /// `ProcessingTime` average is a millisecond value but is compared
    /// against this duration in seconds, so the arm fires far more
    /// eagerly than the name suggests. Kept for compatibility with
    /// existing deployments; the startup log lists the effective values.
    pub target_processing_time: Duration,
    /// Evaluation tick.
    pub tick_interval: Duration,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            scale_up_threshold: 50.0,
            scale_down_threshold: 10.0,
            cooldown: Duration::from_secs(30),
            target_processing_time: Duration::from_secs(30),
            tick_interval: Duration::from_secs(5),
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Up,
    Down,
    Hold,
}

/// The scaling controller. Holds handles to the pool and the metrics
/// engine; both are leaf services with no back-reference.
pub struct Scaler {
    metrics: MetricsEngine,
    consumer: Arc<Consumer>,
    config: ScalerConfig,
    last_scale_event: Instant,
}

impl Scaler {
    pub fn new(metrics: MetricsEngine, consumer: Arc<Consumer>, config: ScalerConfig) -> Self {
        Self {
            metrics,
            consumer,
            config,
            last_scale_event: Instant::now(),
        }
    }

    /// Pure decision function over the three signals. `processing_time_ms`
    /// is the 1-minute millisecond average; it is compared against the
    /// target expressed in seconds (see [`ScalerConfig`]).
    pub fn evaluate(
        &self,
        queue_depth: f64,
        processing_time_ms: f64,
        utilization: f64,
    ) -> ScaleDecision {
        let target = self.config.target_processing_time.as_secs_f64();

        if queue_depth > self.config.scale_up_threshold
            || utilization > UTILIZATION_SCALE_UP
            || processing_time_ms > target
        {
            return ScaleDecision::Up;
        }

        if queue_depth < self.config.scale_down_threshold
            && utilization < UTILIZATION_SCALE_DOWN
            && processing_time_ms < target
        {
            return ScaleDecision::Down;
        }

        ScaleDecision::Hold
    }

    async fn evaluate_scaling(&mut self) {
        let queue_depth = self.metrics.current(names::QUEUE_DEPTH).await;
        let processing_time_ms = self
            .metrics
            .average(names::PROCESSING_TIME, AVERAGE_WINDOW)
            .await;
        let utilization = self
            .metrics
            .average(names::WORKER_UTILIZATION, AVERAGE_WINDOW)
            .await;

        match self.evaluate(queue_depth, processing_time_ms, utilization) {
            ScaleDecision::Up => match self.consumer.add_worker().await {
                Ok(()) => {
                    self.last_scale_event = Instant::now();
                    info!(
                        queue_depth,
                        utilization,
                        processing_time_ms,
                        "scaled up"
                    );
                }
                Err(e) => info!(error = %e, "scale up skipped"),
            },
            ScaleDecision::Down => {
                if self.last_scale_event.elapsed() <= self.config.cooldown {
                    return;
                }
                match self.consumer.remove_worker().await {
                    Ok(()) => {
                        self.last_scale_event = Instant::now();
                        info!(
                            queue_depth,
                            utilization,
                            processing_time_ms,
                            "scaled down"
                        );
                    }
                    Err(e) => info!(error = %e, "scale down skipped"),
                }
            }
            ScaleDecision::Hold => {}
        }
    }

    /// Run the evaluation loop until shutdown.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            scale_up_threshold = self.config.scale_up_threshold,
            scale_down_threshold = self.config.scale_down_threshold,
            cooldown_secs = self.config.cooldown.as_secs(),
            target_processing_time_secs = self.config.target_processing_time.as_secs(),
            "scaler started; processing-time arm compares millisecond averages against the seconds target"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {
                    self.evaluate_scaling().await;
                }
                _ = shutdown.changed() => {
                    info!("scaler shutting down");
                    break;
                }
            }
        }
    }
}
