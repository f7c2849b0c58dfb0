//! Transaction events
//!
//! Data carried from webhook ingest, through the main queue, to the processor.
//!
//! ```text
//! POST /webhook ──parse──▶ Notification ──▶ TransactionEvent ──encode──▶ queue body
//!                                                                │
//!                          QueueEnvelope ◀──decode── ReceivedMessage
//! ```

pub mod envelope;
pub mod notification;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{MinorUnits, SourceId};

pub use envelope::QueueEnvelope;
pub use notification::{Notification, NotificationError, WebhookNotification};

/// Message attribute carrying the notification type on the queue
pub const WEBHOOK_TYPE_ATTRIBUTE: &str = "webhook_type";

/// Notification types emitted by the source bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    #[default]
    TransactionCreated,
    TransactionUpdated,
    TransactionDeleted,
    Ping,
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// Whether the processor syncs this event to the target ledger
    #[inline]
    pub fn is_sync(&self) -> bool {
        matches!(
            self,
            EventType::TransactionCreated | EventType::TransactionUpdated
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TransactionCreated => "TRANSACTION_CREATED",
            EventType::TransactionUpdated => "TRANSACTION_UPDATED",
            EventType::TransactionDeleted => "TRANSACTION_DELETED",
            EventType::Ping => "PING",
            EventType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A transaction notification received from the source bank.
///
/// Immutable once received; the processor treats the source API as authoritative
/// and only uses this body to find the transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    #[serde(default)]
    pub event_type: EventType,
    pub source_transaction_id: SourceId,
    pub source_account_id: SourceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_category_id: Option<SourceId>,
    /// Signed minor units, negative for debits
    pub amount: MinorUnits,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub raw_payload: serde_json::Value,
}

impl TransactionEvent {
    /// Serialize as a queue message body
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a queue message body
    pub fn from_body(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        let t: EventType = serde_json::from_str("\"TRANSACTION_UPDATED\"").unwrap();
        assert_eq!(t, EventType::TransactionUpdated);
        let t: EventType = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(t, EventType::Unknown);
        assert_eq!(EventType::Ping.to_string(), "PING");
    }

    #[test]
    fn test_sync_event_types() {
        assert!(EventType::TransactionCreated.is_sync());
        assert!(EventType::TransactionUpdated.is_sync());
        assert!(!EventType::TransactionDeleted.is_sync());
        assert!(!EventType::Ping.is_sync());
        assert!(!EventType::Unknown.is_sync());
    }

    #[test]
    fn test_body_keeps_all_fields() {
        let event = TransactionEvent {
            event_type: EventType::TransactionCreated,
            source_transaction_id: "txn_1".into(),
            source_account_id: "acc_1".into(),
            source_category_id: Some("restaurants-and-cafes".into()),
            amount: -500,
            description: "Coffee".into(),
            occurred_at: "2025-12-10T10:00:00Z".parse().unwrap(),
            raw_payload: serde_json::json!({"source_transaction_id": "txn_1"}),
        };

        let body = event.to_body().unwrap();
        assert_eq!(TransactionEvent::from_body(&body).unwrap(), event);
    }
}
