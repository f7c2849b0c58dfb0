//! Webhook ingest: authenticate, validate, enqueue.
//!
//! A request is acknowledged only after the broker has accepted the message.
//! There is no deduplication here; the processor is idempotent.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::error::IngestError;
use super::signature::verify_signature;
use crate::broker::{MessageQueue, OutgoingMessage};
use crate::config::WebhookConfig;
use crate::core_types::MessageId;
use crate::event::{Notification, WEBHOOK_TYPE_ATTRIBUTE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Enqueued(MessageId),
    /// Verified connectivity check; nothing to enqueue
    Ping,
}

pub struct WebhookIngest {
    queue: Arc<dyn MessageQueue>,
    secret: Vec<u8>,
    allow_unsigned: bool,
}

impl WebhookIngest {
    pub fn new(queue: Arc<dyn MessageQueue>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            queue,
            secret: secret.into(),
            allow_unsigned: false,
        }
    }

    pub fn from_config(config: &WebhookConfig, queue: Arc<dyn MessageQueue>) -> Self {
        let ingest = Self::new(queue, config.secret.as_bytes());
        #[cfg(feature = "insecure-webhooks")]
        let ingest = ingest.allow_unsigned(config.allow_unsigned);
        ingest
    }

    /// Accept requests whose signature does not verify. Local testing only.
    #[cfg(feature = "insecure-webhooks")]
    pub fn allow_unsigned(mut self, allow: bool) -> Self {
        self.allow_unsigned = allow;
        self
    }

    pub async fn ingest(
        &self,
        signature: Option<&str>,
        raw_body: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        if let Err(e) = verify_signature(&self.secret, raw_body, signature) {
            if !self.allow_unsigned {
                warn!(reason = %e, "Webhook rejected: signature");
                return Err(e.into());
            }
            warn!(reason = %e, "Accepting unsigned webhook (insecure-webhooks build)");
        }

        let event = match Notification::parse(raw_body, Utc::now()) {
            Ok(Notification::Transaction(event)) => event,
            Ok(Notification::Ping) => {
                info!("Received ping from source bank");
                return Ok(IngestOutcome::Ping);
            }
            Err(e) => {
                warn!(reason = %e, "Webhook rejected: payload");
                return Err(e.into());
            }
        };

        let message = OutgoingMessage::new(event.to_body()?)
            .with_attribute(WEBHOOK_TYPE_ATTRIBUTE, event.event_type.as_str());
        let message_id = self.queue.send(message).await?;

        info!(
            message_id = %message_id,
            source_transaction_id = %event.source_transaction_id,
            event_type = %event.event_type,
            queue = %self.queue.name(),
            "Webhook enqueued"
        );
        Ok(IngestOutcome::Enqueued(message_id))
    }
}
