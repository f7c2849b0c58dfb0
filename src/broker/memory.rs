//! In-process broker
//!
//! Honors the same delivery contract as the PostgreSQL broker. Used by tests and
//! the `memory` storage backend. Time is read from `tokio::time::Instant`, so paused-clock tests
//! can step through visibility and retention windows.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    MessageQueue, OutgoingMessage, QueueError, QueuePolicy, ReceiptToken, ReceivedMessage,
    clamp_batch,
};
use crate::core_types::MessageId;

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: String,
    attributes: BTreeMap<String, String>,
    delivery_count: u32,
    enqueued_at: Instant,
    visible_at: Instant,
    receipt: Option<ReceiptToken>,
}

/// In-memory queue with optional dead-letter queue
pub struct MemoryQueue {
    name: String,
    policy: QueuePolicy,
    dead_letter: Option<Arc<MemoryQueue>>,
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, policy: QueuePolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            dead_letter: None,
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Attach a dead-letter queue receiving exhausted messages
    pub fn with_dead_letter(mut self, dead_letter: Arc<MemoryQueue>) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }

    /// Build a main queue and its DLQ sharing one policy
    pub fn pair(
        main_name: impl Into<String>,
        dlq_name: impl Into<String>,
        policy: QueuePolicy,
    ) -> (Arc<MemoryQueue>, Arc<MemoryQueue>) {
        let dlq = Arc::new(MemoryQueue::new(dlq_name, policy.clone()));
        let main = Arc::new(MemoryQueue::new(main_name, policy).with_dead_letter(dlq.clone()));
        (main, dlq)
    }

    /// Number of messages held, visible or not
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of message bodies in queue order
    pub fn bodies(&self) -> Vec<String> {
        self.lock().iter().map(|m| m.body.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StoredMessage>> {
        // A panic while holding the lock cannot leave the Vec half-mutated
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn accept_dead_letter(&self, mut message: StoredMessage) {
        let now = Instant::now();
        message.delivery_count = 0;
        message.receipt = None;
        message.enqueued_at = now;
        message.visible_at = now;
        self.lock().push(message);
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: OutgoingMessage) -> Result<MessageId, QueueError> {
        let now = Instant::now();
        let message_id = Uuid::new_v4().to_string();
        self.lock().push(StoredMessage {
            message_id: message_id.clone(),
            body: message.body,
            attributes: message.attributes,
            delivery_count: 0,
            enqueued_at: now,
            visible_at: now,
            receipt: None,
        });
        debug!(queue = %self.name, message_id = %message_id, "Message enqueued");
        Ok(message_id)
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let limit = clamp_batch(max_messages);
        let now = Instant::now();
        let mut delivered = Vec::with_capacity(limit);
        let mut exhausted = Vec::new();

        {
            let mut messages = self.lock();
            let retention = self.policy.retention;
            messages.retain(|m| now.duration_since(m.enqueued_at) < retention);

            let mut i = 0;
            while i < messages.len() && delivered.len() < limit {
                if messages[i].visible_at > now {
                    i += 1;
                    continue;
                }

                if self.dead_letter.is_some()
                    && messages[i].delivery_count >= self.policy.max_receive_count
                {
                    exhausted.push(messages.remove(i));
                    continue;
                }

                let message = &mut messages[i];
                let receipt = ReceiptToken(Uuid::new_v4().to_string());
                message.delivery_count += 1;
                message.visible_at = now + self.policy.visibility_timeout;
                message.receipt = Some(receipt.clone());

                delivered.push(ReceivedMessage {
                    message_id: message.message_id.clone(),
                    receipt_token: receipt,
                    body: message.body.clone(),
                    attributes: message.attributes.clone(),
                    delivery_count: message.delivery_count,
                });
                i += 1;
            }
        }

        if let Some(dlq) = &self.dead_letter {
            for message in exhausted {
                warn!(
                    queue = %self.name,
                    dead_letter = %dlq.name,
                    message_id = %message.message_id,
                    delivery_count = message.delivery_count,
                    "Delivery attempts exhausted, moving message to DLQ"
                );
                dlq.accept_dead_letter(message);
            }
        }

        Ok(delivered)
    }

    async fn delete(&self, receipt: &ReceiptToken) -> Result<(), QueueError> {
        let mut messages = self.lock();
        let before = messages.len();
        messages.retain(|m| m.receipt.as_ref() != Some(receipt));
        if messages.len() == before {
            debug!(queue = %self.name, receipt = %receipt, "Delete for unknown receipt ignored");
        }
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt: &ReceiptToken,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let now = Instant::now();
        if let Some(message) = self
            .lock()
            .iter_mut()
            .find(|m| m.receipt.as_ref() == Some(receipt))
        {
            message.visible_at = now + timeout;
        }
        Ok(())
    }

    async fn approximate_len(&self) -> Result<u64, QueueError> {
        Ok(self.len() as u64)
    }
}
