//! sluice-queue — the queue transport seam.
//!
//! Defines the capability set the consumer core needs from a pull-based
//! message queue (`QueueClient`) and an in-memory implementation with
//! visibility-timeout semantics (`MemoryQueue`) used by tests and by the
//! daemon's local mode. Real transports live out of tree and implement
//! the same trait.

pub mod client;
pub mod memory;

pub use client::{
    QueueAttributes, QueueClient, QueueMessage, ReceiveRequest, ATTR_APPROXIMATE_MESSAGES,
    ATTR_APPROXIMATE_MESSAGES_NOT_VISIBLE,
};
pub use memory::MemoryQueue;
