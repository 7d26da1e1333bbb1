//! In-memory queue with visibility-timeout semantics.
//!
//! Reference implementation of [`QueueClient`] backing tests and the
//! daemon's local mode. Messages become invisible for the reservation
//! window when received and reappear if neither deleted nor extended.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::client::{
    QueueAttributes, QueueClient, QueueMessage, ReceiveRequest, ATTR_APPROXIMATE_MESSAGES,
    ATTR_APPROXIMATE_MESSAGES_NOT_VISIBLE,
};

/// Poll granularity for emulating server-side long polls.
const LONG_POLL_STEP: Duration = Duration::from_millis(50);

struct StoredMessage {
    id: String,
    body: Vec<u8>,
    /// When the message next becomes receivable.
    visible_at: Instant,
    /// Receipt token of the most recent receive, if any.
    receipt_token: Option<String>,
}

/// A single in-memory queue. The `queue_url` argument of the trait
/// methods is accepted for interface parity but not interpreted.
pub struct MemoryQueue {
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a message body.
    pub async fn send(&self, body: impl Into<Vec<u8>>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut messages = self.messages.lock().await;
        messages.push(StoredMessage {
            id: id.clone(),
            body: body.into(),
            visible_at: Instant::now(),
            receipt_token: None,
        });
        id
    }

    /// Count of messages currently receivable.
    pub async fn visible_count(&self) -> usize {
        let now = Instant::now();
        let messages = self.messages.lock().await;
        messages.iter().filter(|m| m.visible_at <= now).count()
    }

    /// Count of messages received but neither deleted nor timed out.
    pub async fn in_flight_count(&self) -> usize {
        let now = Instant::now();
        let messages = self.messages.lock().await;
        messages.iter().filter(|m| m.visible_at > now).count()
    }

    async fn try_receive(&self, request: &ReceiveRequest) -> Vec<QueueMessage> {
        let now = Instant::now();
        let mut messages = self.messages.lock().await;
        let mut received = Vec::new();

        for stored in messages.iter_mut() {
            if received.len() as u32 >= request.max_messages {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            let receipt = Uuid::new_v4().to_string();
            stored.visible_at = now + Duration::from_secs(request.visibility_seconds as u64);
            stored.receipt_token = Some(receipt.clone());
            received.push(QueueMessage {
                id: stored.id.clone(),
                receipt_token: receipt,
                body: stored.body.clone(),
            });
        }

        received
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn receive(
        &self,
        _queue_url: &str,
        request: ReceiveRequest,
    ) -> anyhow::Result<Vec<QueueMessage>> {
        let deadline = Instant::now() + Duration::from_secs(request.wait_seconds as u64);

        loop {
            let received = self.try_receive(&request).await;
            if !received.is_empty() || Instant::now() >= deadline {
                return Ok(received);
            }
            tokio::time::sleep(LONG_POLL_STEP).await;
        }
    }

    async fn delete(&self, _queue_url: &str, receipt_token: &str) -> anyhow::Result<()> {
        let mut messages = self.messages.lock().await;
        let before = messages.len();
        messages.retain(|m| m.receipt_token.as_deref() != Some(receipt_token));
        if messages.len() == before {
            anyhow::bail!("unknown receipt token: {receipt_token}");
        }
        Ok(())
    }

    async fn change_visibility(
        &self,
        _queue_url: &str,
        receipt_token: &str,
        visibility_seconds: u32,
    ) -> anyhow::Result<()> {
        let mut messages = self.messages.lock().await;
        let stored = messages
            .iter_mut()
            .find(|m| m.receipt_token.as_deref() == Some(receipt_token))
            .ok_or_else(|| anyhow::anyhow!("unknown receipt token: {receipt_token}"))?;
        stored.visible_at = Instant::now() + Duration::from_secs(visibility_seconds as u64);
        Ok(())
    }

    async fn get_attributes(
        &self,
        _queue_url: &str,
        attribute_names: &[&str],
    ) -> anyhow::Result<QueueAttributes> {
        let now = Instant::now();
        let messages = self.messages.lock().await;
        let visible = messages.iter().filter(|m| m.visible_at <= now).count();
        let not_visible = messages.len() - visible;

        let mut attributes = HashMap::new();
        for name in attribute_names {
            match *name {
                ATTR_APPROXIMATE_MESSAGES => {
                    attributes.insert((*name).to_string(), visible.to_string());
                }
                ATTR_APPROXIMATE_MESSAGES_NOT_VISIBLE => {
                    attributes.insert((*name).to_string(), not_visible.to_string());
                }
                _ => {}
            }
        }
        Ok(attributes)
    }
}
