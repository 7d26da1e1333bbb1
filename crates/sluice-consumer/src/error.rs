//! Consumer error types.

use thiserror::Error;

/// Errors from pool operations. The bound violations are benign from the
/// scaler's perspective — it logs them and moves on.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("max worker count reached")]
    MaxWorkersReached,

    #[error("min worker count reached")]
    MinWorkersReached,

    #[error("invalid consumer configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start initial workers: {0}")]
    Startup(#[source] Box<ConsumerError>),
}
