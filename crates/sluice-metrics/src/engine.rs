//! The metrics engine — bounded ingress, one drain task, shared-read state.
//!
//! Producers call `record()` and never observe an error: the sample is
//! queued on a bounded channel (briefly blocking the caller when full,
//! which couples producers to drain speed) and folded into state by a
//! single drain task. Readers take the state lock shared; only the drain
//! task takes it exclusively.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::publisher::{MetricDatum, MetricPublisher};
use crate::sample::{MetricSample, MetricUnit};

/// Engine tuning. Defaults carry the service's fixed constants; tests
/// construct shorter intervals.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ingress channel capacity.
    pub ingress_capacity: usize,
    /// Window retention horizon.
    pub retention: Duration,
    /// Cadence of pushes to the metric sink.
    pub publish_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ingress_capacity: 1024,
            retention: Duration::from_secs(30 * 60),
            publish_interval: Duration::from_secs(10),
        }
    }
}

/// Per-name state: last-writer-wins current value plus the retained
/// window of (value, timestamp) points.
struct MetricState {
    current: f64,
    unit: MetricUnit,
    window: Vec<(f64, Instant)>,
}

struct Inner {
    tx: mpsc::Sender<MetricSample>,
    rx: Mutex<Option<mpsc::Receiver<MetricSample>>>,
    state: RwLock<HashMap<String, MetricState>>,
    publisher: Arc<dyn MetricPublisher>,
    namespace: String,
    config: EngineConfig,
}

impl Inner {
    /// Fold one sample into state. Exclusive lock per applied sample.
    async fn apply(&self, sample: MetricSample) {
        let mut state = self.state.write().await;
        let entry = state.entry(sample.name).or_insert_with(|| MetricState {
            current: 0.0,
            unit: sample.unit,
            window: Vec::new(),
        });

        entry.current = sample.value;
        entry.unit = sample.unit;
        entry.window.push((sample.value, sample.timestamp));

        // Drop the stale leading prefix. Producers interleave, so the scan
        // stops at the first in-window point rather than assuming a sorted
        // sequence; aging of out-of-order stragglers is eventual.
        let cutoff = Instant::now().checked_sub(self.config.retention);
        if let Some(cutoff) = cutoff {
            let keep = entry
                .window
                .iter()
                .position(|(_, ts)| *ts > cutoff)
                .unwrap_or(entry.window.len());
            if keep > 0 {
                entry.window.drain(..keep);
            }
        }
    }
}

/// Handle to the metrics engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct MetricsEngine {
    inner: Arc<Inner>,
}

impl MetricsEngine {
    pub fn new(publisher: Arc<dyn MetricPublisher>, namespace: impl Into<String>) -> Self {
        Self::with_config(publisher, namespace, EngineConfig::default())
    }

    pub fn with_config(
        publisher: Arc<dyn MetricPublisher>,
        namespace: impl Into<String>,
        config: EngineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.ingress_capacity);
        Self {
            inner: Arc::new(Inner {
                tx,
                rx: Mutex::new(Some(rx)),
                state: RwLock::new(HashMap::new()),
                publisher,
                namespace: namespace.into(),
                config,
            }),
        }
    }

    /// Queue a sample for ingestion. Blocks briefly if the ingress buffer
    /// is full; the caller never observes an error. Once the engine has
    /// stopped, samples are dropped.
    pub async fn record(&self, name: &str, value: f64, unit: MetricUnit) {
        let sample = MetricSample::new(name, value, unit);
        if self.inner.tx.send(sample).await.is_err() {
            debug!(name, "metrics ingress closed, sample dropped");
        }
    }

    /// Record a message processing duration in milliseconds.
    pub async fn record_processing_time(&self, elapsed: Duration) {
        self.record(
            crate::names::PROCESSING_TIME,
            elapsed.as_millis() as f64,
            MetricUnit::Milliseconds,
        )
        .await;
    }

    /// Record the current visible queue depth.
    pub async fn record_queue_depth(&self, depth: u64) {
        self.record(crate::names::QUEUE_DEPTH, depth as f64, MetricUnit::Count)
            .await;
    }

    /// Record a worker utilization percentage.
    pub async fn record_worker_utilization(&self, percent: f64) {
        self.record(crate::names::WORKER_UTILIZATION, percent, MetricUnit::Percent)
            .await;
    }

    /// Increment the error counter for a kind, e.g. `"poll_error"`.
    pub async fn record_error(&self, kind: &str) {
        self.record(&crate::names::error_metric(kind), 1.0, MetricUnit::Count)
            .await;
    }

    /// Latest drained value for a name; 0 if never recorded.
    pub async fn current(&self, name: &str) -> f64 {
        let state = self.inner.state.read().await;
        state.get(name).map(|m| m.current).unwrap_or(0.0)
    }

    /// Unweighted mean of window points strictly newer than
    /// `now − window`; 0 if none qualify.
    pub async fn average(&self, name: &str, window: Duration) -> f64 {
        let state = self.inner.state.read().await;
        let Some(metric) = state.get(name) else {
            return 0.0;
        };

        let cutoff = Instant::now().checked_sub(window);
        let mut sum = 0.0;
        let mut count = 0usize;
        for (value, ts) in &metric.window {
            let in_window = match cutoff {
                Some(cutoff) => *ts > cutoff,
                None => true,
            };
            if in_window {
                sum += value;
                count += 1;
            }
        }

        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// Run the drain task and publish loop until shutdown. Call once.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut rx) = self.inner.rx.lock().await.take() else {
            warn!("metrics engine run() called twice, ignoring");
            return;
        };

        info!(
            publish_interval_secs = self.inner.config.publish_interval.as_secs(),
            namespace = %self.inner.namespace,
            "metrics engine started"
        );

        let drain_inner = Arc::clone(&self.inner);
        let mut drain_shutdown = shutdown.clone();
        let drain = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(sample) => drain_inner.apply(sample).await,
                        None => break,
                    },
                    _ = drain_shutdown.changed() => break,
                }
            }
        });

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.inner.config.publish_interval) => {
                    self.publish_once().await;
                }
                _ = shutdown.changed() => {
                    info!("metrics engine shutting down");
                    break;
                }
            }
        }

        let _ = drain.await;
    }

    /// Push one datum per known name, stamped now. Errors are logged and
    /// discarded; individual publications are never retried.
    async fn publish_once(&self) {
        let data: Vec<MetricDatum> = {
            let state = self.inner.state.read().await;
            let now = SystemTime::now();
            state
                .iter()
                .map(|(name, metric)| MetricDatum {
                    name: name.clone(),
                    value: metric.current,
                    unit: metric.unit,
                    timestamp: now,
                })
                .collect()
        };

        if data.is_empty() {
            return;
        }

        if let Err(e) = self
            .inner
            .publisher
            .publish(&self.inner.namespace, data)
            .await
        {
            warn!(error = %e, "metric publish failed");
        }
    }

    #[cfg(test)]
    async fn apply_direct(&self, sample: MetricSample) {
        self.inner.apply(sample).await;
    }

    #[cfg(test)]
    async fn window_len(&self, name: &str) -> usize {
        let state = self.inner.state.read().await;
        state.get(name).map(|m| m.window.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct RecordingPublisher {
        batches: StdMutex<Vec<(String, Vec<MetricDatum>)>>,
    }

    impl RecordingPublisher {
        fn new() -> Self {
            Self {
                batches: StdMutex::new(Vec::new()),
            }
        }

        fn batch_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }

        fn last_batch(&self) -> Option<(String, Vec<MetricDatum>)> {
            self.batches.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl MetricPublisher for RecordingPublisher {
        async fn publish(&self, namespace: &str, data: Vec<MetricDatum>) -> anyhow::Result<()> {
            self.batches
                .lock()
                .unwrap()
                .push((namespace.to_string(), data));
            Ok(())
        }
    }

    struct FailingPublisher {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl MetricPublisher for FailingPublisher {
        async fn publish(&self, _namespace: &str, _data: Vec<MetricDatum>) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("sink unavailable")
        }
    }

    fn test_engine() -> MetricsEngine {
        MetricsEngine::new(Arc::new(crate::publisher::LogPublisher), "test")
    }

    fn sample_at(name: &str, value: f64, age: Duration) -> MetricSample {
        MetricSample {
            name: name.to_string(),
            value,
            unit: MetricUnit::Count,
            timestamp: Instant::now() - age,
        }
    }

    async fn wait_for_current(engine: &MetricsEngine, name: &str, expected: f64) {
        for _ in 0..200 {
            if (engine.current(name).await - expected).abs() < f64::EPSILON {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("metric {name} never reached {expected}");
    }

    #[tokio::test]
    async fn current_defaults_to_zero() {
        let engine = test_engine();
        assert_eq!(engine.current("NeverRecorded").await, 0.0);
        assert_eq!(engine.average("NeverRecorded", Duration::from_secs(60)).await, 0.0);
    }

    #[tokio::test]
    async fn recorded_sample_reaches_current_through_ingress() {
        let engine = test_engine();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        engine.record("X", 42.0, MetricUnit::Count).await;
        wait_for_current(&engine, "X", 42.0).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn last_writer_wins_for_current() {
        let engine = test_engine();
        engine.apply_direct(sample_at("X", 1.0, Duration::ZERO)).await;
        engine.apply_direct(sample_at("X", 2.0, Duration::ZERO)).await;
        assert_eq!(engine.current("X").await, 2.0);
    }

    #[tokio::test]
    async fn average_ignores_samples_outside_window() {
        let engine = test_engine();
        // X=10 at t−121s, X=20 at t−1s; a 60-second average sees only 20.
        engine
            .apply_direct(sample_at("X", 10.0, Duration::from_secs(121)))
            .await;
        engine
            .apply_direct(sample_at("X", 20.0, Duration::from_secs(1)))
            .await;

        assert_eq!(engine.average("X", Duration::from_secs(60)).await, 20.0);
        // A wide enough window sees both.
        assert_eq!(engine.average("X", Duration::from_secs(300)).await, 15.0);
    }

    #[tokio::test]
    async fn average_is_zero_when_all_samples_stale() {
        let engine = test_engine();
        engine
            .apply_direct(sample_at("X", 10.0, Duration::from_secs(120)))
            .await;
        assert_eq!(engine.average("X", Duration::from_secs(60)).await, 0.0);
    }

    #[tokio::test]
    async fn identical_samples_grow_window_by_two() {
        let engine = test_engine();
        engine.apply_direct(sample_at("X", 7.0, Duration::ZERO)).await;
        let before = engine.window_len("X").await;

        engine.apply_direct(sample_at("X", 7.0, Duration::ZERO)).await;
        engine.apply_direct(sample_at("X", 7.0, Duration::ZERO)).await;

        assert_eq!(engine.window_len("X").await, before + 2);
        assert_eq!(engine.average("X", Duration::from_secs(60)).await, 7.0);
    }

    fn short_retention_engine() -> MetricsEngine {
        MetricsEngine::with_config(
            Arc::new(crate::publisher::LogPublisher),
            "test",
            EngineConfig {
                retention: Duration::from_secs(60),
                ..EngineConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn append_prunes_stale_prefix() {
        let engine = short_retention_engine();
        engine
            .apply_direct(sample_at("X", 1.0, Duration::from_secs(120)))
            .await;
        // A fully stale window is emptied on the mutation itself.
        assert_eq!(engine.window_len("X").await, 0);
        assert_eq!(engine.current("X").await, 1.0);

        engine.apply_direct(sample_at("X", 2.0, Duration::ZERO)).await;
        assert_eq!(engine.window_len("X").await, 1);
    }

    #[tokio::test]
    async fn prune_stops_at_first_in_window_point() {
        let engine = short_retention_engine();
        // An in-window point followed by an out-of-order stale straggler:
        // the scan stops at the in-window head, so the straggler survives.
        engine
            .apply_direct(sample_at("X", 5.0, Duration::from_secs(5)))
            .await;
        engine
            .apply_direct(sample_at("X", 6.0, Duration::from_secs(120)))
            .await;
        assert_eq!(engine.window_len("X").await, 2);
    }

    #[tokio::test]
    async fn publish_loop_pushes_current_values() {
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = MetricsEngine::with_config(
            publisher.clone(),
            "test-ns",
            EngineConfig {
                publish_interval: Duration::from_millis(20),
                ..EngineConfig::default()
            },
        );
        engine
            .apply_direct(sample_at(names::QUEUE_DEPTH, 12.0, Duration::ZERO))
            .await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        for _ in 0..200 {
            if publisher.batch_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let (namespace, data) = publisher.last_batch().expect("no batch published");
        assert_eq!(namespace, "test-ns");
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].name, names::QUEUE_DEPTH);
        assert_eq!(data[0].value, 12.0);
    }

    #[tokio::test]
    async fn nothing_published_before_first_sample() {
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = MetricsEngine::with_config(
            publisher.clone(),
            "test",
            EngineConfig {
                publish_interval: Duration::from_millis(10),
                ..EngineConfig::default()
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(publisher.batch_count(), 0);
    }

    #[tokio::test]
    async fn publisher_failure_does_not_stop_the_engine() {
        let publisher = Arc::new(FailingPublisher {
            attempts: AtomicUsize::new(0),
        });
        let engine = MetricsEngine::with_config(
            publisher.clone(),
            "test",
            EngineConfig {
                publish_interval: Duration::from_millis(10),
                ..EngineConfig::default()
            },
        );
        engine.apply_direct(sample_at("X", 1.0, Duration::ZERO)).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        // Ingest keeps working across repeated publish failures.
        for _ in 0..200 {
            if publisher.attempts.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        engine.record("Y", 3.0, MetricUnit::Count).await;
        wait_for_current(&engine, "Y", 3.0).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(publisher.attempts.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn helper_recorders_use_canonical_names() {
        let engine = test_engine();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        engine.record_queue_depth(9).await;
        engine
            .record_processing_time(Duration::from_millis(250))
            .await;
        engine.record_worker_utilization(55.0).await;
        engine.record_error("poll_error").await;

        wait_for_current(&engine, names::QUEUE_DEPTH, 9.0).await;
        wait_for_current(&engine, names::PROCESSING_TIME, 250.0).await;
        wait_for_current(&engine, names::WORKER_UTILIZATION, 55.0).await;
        wait_for_current(&engine, "Error_poll_error", 1.0).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
