//! The `QueueClient` trait — receive, delete, extend visibility, and
//! report depth. The core never inspects message bodies; it only moves
//! handles through the receive-process-delete cycle.

use std::collections::HashMap;

use async_trait::async_trait;

/// Attribute name for the approximate count of visible messages.
pub const ATTR_APPROXIMATE_MESSAGES: &str = "ApproximateNumberOfMessages";

/// Attribute name for the approximate count of in-flight messages.
pub const ATTR_APPROXIMATE_MESSAGES_NOT_VISIBLE: &str =
    "ApproximateNumberOfMessagesNotVisible";

/// A received message handle. The body is opaque to the core; the
/// receipt token is what delete and visibility changes key on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub receipt_token: String,
    pub body: Vec<u8>,
}

/// Parameters for a single receive call.
#[derive(Debug, Clone)]
pub struct ReceiveRequest {
    /// Maximum number of messages to return.
    pub max_messages: u32,
    /// Server-side long-poll wait.
    pub wait_seconds: u32,
    /// Visibility reservation applied to every returned message.
    pub visibility_seconds: u32,
}

/// String-encoded attribute values, keyed by attribute name.
pub type QueueAttributes = HashMap<String, String>;

/// Capability set the consumer core requires from a queue transport.
///
/// Implementations are expected to surface transient transport failures
/// as errors; the core treats every error here as retryable.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Long-poll for up to `max_messages`, reserving visibility on each.
    async fn receive(
        &self,
        queue_url: &str,
        request: ReceiveRequest,
    ) -> anyhow::Result<Vec<QueueMessage>>;

    /// Delete a message by receipt token.
    async fn delete(&self, queue_url: &str, receipt_token: &str) -> anyhow::Result<()>;

    /// Reset a message's visibility timeout, making it receivable again
    /// after `visibility_seconds`.
    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_token: &str,
        visibility_seconds: u32,
    ) -> anyhow::Result<()>;

    /// Fetch approximate depth attributes for the queue.
    async fn get_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[&str],
    ) -> anyhow::Result<QueueAttributes>;
}
