//! PostgreSQL broker
//!
//! Main queue and DLQ share the `queue_messages` table, partitioned by `queue_name`.
//! Receives claim rows with `FOR UPDATE SKIP LOCKED`, so concurrent processor
//! invocations never receive the same delivery twice.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    MessageQueue, OutgoingMessage, QueueError, QueuePolicy, ReceiptToken, ReceivedMessage,
    clamp_batch,
};
use crate::core_types::MessageId;

/// Queue backed by the `queue_messages` table
pub struct PgQueue {
    pool: PgPool,
    name: String,
    dead_letter: Option<String>,
    policy: QueuePolicy,
}

impl PgQueue {
    pub fn new(pool: PgPool, name: impl Into<String>, policy: QueuePolicy) -> Self {
        Self {
            pool,
            name: name.into(),
            dead_letter: None,
            policy,
        }
    }

    /// Route exhausted messages to the named dead-letter queue
    pub fn with_dead_letter(mut self, dead_letter: impl Into<String>) -> Self {
        self.dead_letter = Some(dead_letter.into());
        self
    }

    /// Drop messages older than the retention period
    async fn purge_expired(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE queue_name = $1
              AND enqueued_at < NOW() - make_interval(secs => $2)
            "#,
        )
        .bind(&self.name)
        .bind(self.policy.retention.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Move visible messages whose delivery budget is spent to the DLQ
    async fn move_exhausted(&self, dead_letter: &str) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET queue_name = $2,
                delivery_count = 0,
                receipt_token = NULL,
                visible_at = NOW(),
                enqueued_at = NOW()
            WHERE queue_name = $1
              AND delivery_count >= $3
              AND visible_at <= NOW()
            "#,
        )
        .bind(&self.name)
        .bind(dead_letter)
        .bind(self.policy.max_receive_count as i32)
        .execute(&self.pool)
        .await?;

        let moved = result.rows_affected();
        if moved > 0 {
            warn!(
                queue = %self.name,
                dead_letter = %dead_letter,
                count = moved,
                "Delivery attempts exhausted, moved messages to DLQ"
            );
        }
        Ok(moved)
    }
}

#[async_trait]
impl MessageQueue for PgQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: OutgoingMessage) -> Result<MessageId, QueueError> {
        let message_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO queue_messages
                (message_id, queue_name, body, attributes, delivery_count, visible_at, enqueued_at)
            VALUES
                ($1, $2, $3, $4, 0, NOW(), NOW())
            "#,
        )
        .bind(message_id)
        .bind(&self.name)
        .bind(&message.body)
        .bind(Json(&message.attributes))
        .execute(&self.pool)
        .await?;

        debug!(queue = %self.name, message_id = %message_id, "Message enqueued");
        Ok(message_id.to_string())
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let limit = clamp_batch(max_messages);
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.purge_expired().await?;
        if let Some(dead_letter) = &self.dead_letter {
            self.move_exhausted(dead_letter).await?;
        }

        let rows = sqlx::query(
            r#"
            UPDATE queue_messages q
            SET delivery_count = q.delivery_count + 1,
                receipt_token = gen_random_uuid(),
                visible_at = NOW() + make_interval(secs => $3)
            FROM (
                SELECT message_id FROM queue_messages
                WHERE queue_name = $1 AND visible_at <= NOW()
                ORDER BY enqueued_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            ) claimed
            WHERE q.message_id = claimed.message_id
            RETURNING q.message_id, q.body, q.attributes, q.delivery_count, q.receipt_token
            "#,
        )
        .bind(&self.name)
        .bind(limit as i64)
        .bind(self.policy.visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let message_id: Uuid = row.try_get("message_id")?;
                let receipt: Uuid = row.try_get("receipt_token")?;
                let attributes: Json<BTreeMap<String, String>> = row.try_get("attributes")?;
                let delivery_count: i32 = row.try_get("delivery_count")?;
                Ok(ReceivedMessage {
                    message_id: message_id.to_string(),
                    receipt_token: ReceiptToken(receipt.to_string()),
                    body: row.try_get("body")?,
                    attributes: attributes.0,
                    delivery_count: delivery_count.max(0) as u32,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(QueueError::from)
    }

    async fn delete(&self, receipt: &ReceiptToken) -> Result<(), QueueError> {
        let Ok(token) = Uuid::parse_str(&receipt.0) else {
            debug!(queue = %self.name, receipt = %receipt, "Delete for malformed receipt ignored");
            return Ok(());
        };

        let result = sqlx::query(
            "DELETE FROM queue_messages WHERE queue_name = $1 AND receipt_token = $2",
        )
        .bind(&self.name)
        .bind(token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(queue = %self.name, receipt = %receipt, "Delete for unknown receipt ignored");
        }
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt: &ReceiptToken,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let token = Uuid::parse_str(&receipt.0)
            .map_err(|e| QueueError::Serialization(format!("invalid receipt: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE queue_messages
            SET visible_at = NOW() + make_interval(secs => $3)
            WHERE queue_name = $1 AND receipt_token = $2
            "#,
        )
        .bind(&self.name)
        .bind(token)
        .bind(timeout.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn approximate_len(&self) -> Result<u64, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE queue_name = $1")
                .bind(&self.name)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }
}
