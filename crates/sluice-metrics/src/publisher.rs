//! The metric sink seam.
//!
//! The engine publishes one datum per known metric name on its cadence;
//! sinks are polymorphic over this trait. Publish failures are the
//! caller's to log and drop — the engine never retries a publication.

use std::time::SystemTime;

use async_trait::async_trait;
use tracing::info;

use crate::sample::MetricUnit;

/// One published data point. Stamped at publish time, not sample time.
#[derive(Debug, Clone)]
pub struct MetricDatum {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub timestamp: SystemTime,
}

/// Capability set the engine requires from a metric sink. No
/// transactional guarantees; a batch may be partially applied.
#[async_trait]
pub trait MetricPublisher: Send + Sync {
    async fn publish(&self, namespace: &str, data: Vec<MetricDatum>) -> anyhow::Result<()>;
}

/// Publishes each datum as a structured log line. The default sink for
/// local runs; production deployments substitute a real exporter.
pub struct LogPublisher;

#[async_trait]
impl MetricPublisher for LogPublisher {
    async fn publish(&self, namespace: &str, data: Vec<MetricDatum>) -> anyhow::Result<()> {
        for datum in &data {
            info!(
                namespace,
                name = %datum.name,
                value = datum.value,
                unit = %datum.unit,
                "metric"
            );
        }
        Ok(())
    }
}
