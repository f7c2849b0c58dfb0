//! Inbound webhook notification parsing
//!
//! Malformed payloads are rejected here, before anything reaches the queue.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use validator::Validate;

use super::{EventType, TransactionEvent};
use crate::core_types::MinorUnits;

/// Notification parse failures (all map to a validation rejection)
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Body is not valid JSON: {0}")]
    Json(String),

    #[error("Body does not match the notification schema: {0}")]
    Schema(String),

    #[error("Invalid field: {0}")]
    Field(String),
}

/// Wire shape of a transaction notification
#[derive(Debug, Deserialize, Validate)]
pub struct WebhookNotification {
    #[serde(default)]
    pub event_type: EventType,

    #[validate(length(min = 1, max = 128))]
    pub source_transaction_id: String,

    #[validate(length(min = 1, max = 128))]
    pub source_account_id: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub source_category_id: Option<String>,

    pub amount: MinorUnits,

    #[validate(length(max = 1024))]
    pub description: String,

    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// A parsed inbound notification
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Connectivity check from the source bank; carries no transaction
    Ping,
    Transaction(TransactionEvent),
}

impl Notification {
    /// Parse and validate a raw webhook body.
    ///
    /// `received_at` stands in for `occurred_at` when the sender omits it.
    pub fn parse(raw_body: &[u8], received_at: DateTime<Utc>) -> Result<Self, NotificationError> {
        let raw_payload: serde_json::Value =
            serde_json::from_slice(raw_body).map_err(|e| NotificationError::Json(e.to_string()))?;

        if !raw_payload.is_object() {
            return Err(NotificationError::Schema("expected a JSON object".into()));
        }

        let event_type = raw_payload
            .get("event_type")
            .cloned()
            .map(serde_json::from_value::<EventType>)
            .transpose()
            .map_err(|e| NotificationError::Schema(e.to_string()))?
            .unwrap_or_default();

        if event_type == EventType::Ping {
            return Ok(Notification::Ping);
        }

        let notification: WebhookNotification = serde_json::from_value(raw_payload.clone())
            .map_err(|e| NotificationError::Schema(e.to_string()))?;

        notification
            .validate()
            .map_err(|e| NotificationError::Field(e.to_string()))?;

        Ok(Notification::Transaction(TransactionEvent {
            event_type: notification.event_type,
            source_transaction_id: notification.source_transaction_id,
            source_account_id: notification.source_account_id,
            source_category_id: notification.source_category_id,
            amount: notification.amount,
            description: notification.description,
            occurred_at: notification.occurred_at.unwrap_or(received_at),
            raw_payload,
        }))
    }
}
