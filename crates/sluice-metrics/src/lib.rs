//! sluice-metrics — sliding-window metric aggregation.
//!
//! Tasks across the consumer fan samples into a bounded ingress channel;
//! a single drain task folds them into per-name state (current value plus
//! a retention-bounded window), and a publish loop pushes current values
//! to a pluggable sink on a fixed cadence.
//!
//! # Architecture
//!
//! ```text
//! MetricsEngine
//!   ├── record() ← any task, bounded channel, no error surfaced
//!   ├── current() / average() ← scaler and tests, shared lock
//!   └── run() → drain task + periodic publish loop
//!
//! MetricPublisher
//!   └── LogPublisher → structured log lines (local mode / default sink)
//! ```

pub mod engine;
pub mod names;
pub mod publisher;
pub mod sample;

pub use engine::{EngineConfig, MetricsEngine};
pub use publisher::{LogPublisher, MetricDatum, MetricPublisher};
pub use sample::{MetricSample, MetricUnit};
