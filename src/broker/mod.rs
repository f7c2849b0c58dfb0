//! Message Broker
//!
//! At-least-once queue contract shared by the main queue and its dead-letter queue.
//!
//! # Delivery Contract
//!
//! ```text
//! send ──▶ VISIBLE ──receive──▶ IN_FLIGHT ──delete──▶ (gone)
//!             ▲                     │
//!             └── visibility timeout┘   (delivery_count += 1 per receive)
//!
//! delivery_count >= max_receive_count ──▶ moved to DLQ (retained 14 days)
//! ```
//!
//! # Invariants
//!
//! 1. **At-least-once**: a message is only removed by `delete` or retention expiry
//! 2. **Bounded batches**: `receive` never returns more than [`MAX_RECEIVE_BATCH`] messages
//! 3. **Broker-owned bookkeeping**: only the broker mutates `delivery_count`

pub mod memory;
pub mod pg;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core_types::MessageId;

pub use memory::MemoryQueue;
pub use pg::PgQueue;

/// Upper bound on messages returned by a single receive call
pub const MAX_RECEIVE_BATCH: usize = 10;

/// Queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Opaque handle for one receive of one message.
///
/// A new token is issued on every delivery; `delete` and `change_visibility`
/// act on the delivery the token came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptToken(pub String);

impl fmt::Display for ReceiptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message to enqueue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub body: String,
    pub attributes: BTreeMap<String, String>,
}

impl OutgoingMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A delivered message
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub receipt_token: ReceiptToken,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
    /// Number of deliveries including this one
    pub delivery_count: u32,
}

impl ReceivedMessage {
    /// Equivalent message for re-sending elsewhere (body and attributes preserved)
    pub fn to_outgoing(&self) -> OutgoingMessage {
        OutgoingMessage {
            body: self.body.clone(),
            attributes: self.attributes.clone(),
        }
    }

    /// True on the last delivery the broker allows before dead-lettering
    #[inline]
    pub fn is_final_attempt(&self, max_receive_count: u32) -> bool {
        self.delivery_count >= max_receive_count
    }
}

/// Redelivery and retention policy of one queue
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    /// How long a received message stays hidden before redelivery
    pub visibility_timeout: Duration,
    /// Deliveries allowed before the message moves to the dead-letter queue
    pub max_receive_count: u32,
    /// How long a message is kept before being discarded
    pub retention: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(300),
            max_receive_count: 5,
            retention: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

/// At-least-once message queue
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue name for logging
    fn name(&self) -> &str;

    /// Enqueue a message. Returns once the broker has durably accepted it.
    async fn send(&self, message: OutgoingMessage) -> Result<MessageId, QueueError>;

    /// Receive up to `max_messages` visible messages (clamped to [`MAX_RECEIVE_BATCH`]).
    async fn receive(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Acknowledge a delivery, removing the message.
    ///
    /// Deleting an already-removed message is not an error.
    async fn delete(&self, receipt: &ReceiptToken) -> Result<(), QueueError>;

    /// Reset the visibility deadline of an in-flight delivery to `timeout` from now.
    async fn change_visibility(
        &self,
        receipt: &ReceiptToken,
        timeout: Duration,
    ) -> Result<(), QueueError>;

    /// Approximate number of messages held (visible or in flight)
    async fn approximate_len(&self) -> Result<u64, QueueError>;
}

/// Clamp a requested batch size to the broker limit
#[inline]
pub(crate) fn clamp_batch(max_messages: usize) -> usize {
    max_messages.min(MAX_RECEIVE_BATCH)
}
