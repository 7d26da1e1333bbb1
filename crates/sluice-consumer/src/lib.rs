//! sluice-consumer — the worker pool.
//!
//! A `Consumer` owns a dynamic set of workers, each running one
//! receive-process-delete cycle against the queue with at-least-once
//! semantics. The pool reports queue depth and worker utilization into
//! the metrics engine and exposes `add_worker`/`remove_worker` for the
//! scaling controller.

pub mod config;
pub mod error;
pub mod pool;
pub mod worker;

pub use config::{ConsumerConfig, ConsumerTiming};
pub use error::ConsumerError;
pub use pool::Consumer;
pub use worker::{handler_fn, MessageHandler};
