//! Pool configuration and validation.

use std::time::Duration;

use crate::error::ConsumerError;

/// Consumer pool configuration. The scaling thresholds live with the
/// scaler; this covers the pool itself.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Queue to drain.
    pub queue_url: String,
    /// Workers spawned by `start`.
    pub initial_workers: usize,
    /// Lower pool bound; `remove_worker` refuses below this.
    pub min_workers: usize,
    /// Upper pool bound; `add_worker` refuses above this.
    pub max_workers: usize,
    /// Visibility reservation taken on every receive — how long a worker
    /// has to process a message before the queue re-delivers it.
    pub processing_time: Duration,
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.queue_url.is_empty() {
            return Err(ConsumerError::InvalidConfig("queue_url is required".into()));
        }
        if self.min_workers < 1 {
            return Err(ConsumerError::InvalidConfig(
                "min_workers must be at least 1".into(),
            ));
        }
        if self.initial_workers < self.min_workers || self.initial_workers > self.max_workers {
            return Err(ConsumerError::InvalidConfig(format!(
                "initial_workers {} outside bounds {}..={}",
                self.initial_workers, self.min_workers, self.max_workers
            )));
        }
        Ok(())
    }
}

/// Loop cadences and batch shapes. Defaults carry the service's fixed
/// constants; tests construct shorter intervals.
#[derive(Debug, Clone)]
pub struct ConsumerTiming {
    /// Messages requested per receive.
    pub receive_batch: u32,
    /// Server-side long-poll wait per receive.
    pub receive_wait: Duration,
    /// Back-off after a failed poll.
    pub poll_backoff: Duration,
    /// Per-worker utilization reporting window.
    pub utilization_interval: Duration,
    /// Visibility reset applied when a handler fails, forcing redelivery.
    pub failure_visibility: Duration,
    /// Cadence of the pool-level metrics reporter.
    pub pool_report_interval: Duration,
    /// Cadence of the queue-depth monitor.
    pub queue_depth_interval: Duration,
}

impl Default for ConsumerTiming {
    fn default() -> Self {
        Self {
            receive_batch: 10,
            receive_wait: Duration::from_secs(20),
            poll_backoff: Duration::from_secs(1),
            utilization_interval: Duration::from_secs(10),
            failure_visibility: Duration::from_secs(30),
            pool_report_interval: Duration::from_secs(10),
            queue_depth_interval: Duration::from_secs(10),
        }
    }
}
