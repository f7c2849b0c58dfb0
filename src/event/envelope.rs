//! Queue envelope: one delivered transaction event plus broker metadata

use super::TransactionEvent;
use crate::broker::{ReceiptToken, ReceivedMessage};
use crate::core_types::MessageId;

/// A [`TransactionEvent`] as delivered by the main queue.
///
/// `delivery_count` is read-only here; only the broker advances it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEnvelope {
    pub message_id: MessageId,
    pub receipt_token: ReceiptToken,
    pub body: TransactionEvent,
    pub delivery_count: u32,
}

impl QueueEnvelope {
    /// Decode a received message. Fails only if the body is not a `TransactionEvent`.
    pub fn decode(message: &ReceivedMessage) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_id: message.message_id.clone(),
            receipt_token: message.receipt_token.clone(),
            body: TransactionEvent::from_body(&message.body)?,
            delivery_count: message.delivery_count,
        })
    }

    /// True on the last delivery the broker allows before dead-lettering
    #[inline]
    pub fn is_final_attempt(&self, max_receive_count: u32) -> bool {
        self.delivery_count >= max_receive_count
    }
}
