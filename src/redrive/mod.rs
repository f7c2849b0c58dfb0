//! DLQ Redrive
//!
//! Moves dead-lettered messages back to the main queue.
//!
//! # Invariants
//!
//! 1. **Send before delete**: a message leaves the DLQ only after the main
//!    queue accepted its copy; a crash in between yields a duplicate, which the
//!    processor absorbs
//! 2. **Bounded**: a run stops once `max_messages` have been attempted or a
//!    receive comes back empty
//! 3. **Isolation**: one message's failure is recorded and the batch continues

pub mod state;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use state::RedriveState;

use crate::broker::{MAX_RECEIVE_BATCH, MessageQueue, QueueError, ReceivedMessage};
use crate::core_types::MessageId;

/// Default `maxMessages` when an invocation omits it
pub const DEFAULT_MAX_MESSAGES: usize = 10;
/// Errors included in a response body
pub const MAX_REPORTED_ERRORS: usize = 10;

pub const EMPTY_DLQ_MESSAGE: &str = "No messages in DLQ";
pub const COMPLETED_MESSAGE: &str = "DLQ redrive completed";

/// One message that could not be moved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedriveFailure {
    pub message_id: MessageId,
    pub reason: String,
}

impl std::fmt::Display for RedriveFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Failed to redrive message {}: {}",
            self.message_id, self.reason
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedriveResult {
    pub redriven_count: usize,
    pub failed_count: usize,
    pub errors: Vec<RedriveFailure>,
    /// The DLQ depth check found nothing to do
    pub dlq_empty: bool,
}

impl RedriveResult {
    fn attempted(&self) -> usize {
        self.redriven_count + self.failed_count
    }
}

/// Fatal redrive failure. Carries what was done before it.
#[derive(Debug, Error)]
#[error("Error during DLQ redrive: {source}")]
pub struct RedriveError {
    #[source]
    pub source: QueueError,
    pub partial: RedriveResult,
}

pub struct DlqRedrive {
    dlq: Arc<dyn MessageQueue>,
    main: Arc<dyn MessageQueue>,
}

impl DlqRedrive {
    pub fn new(dlq: Arc<dyn MessageQueue>, main: Arc<dyn MessageQueue>) -> Self {
        Self { dlq, main }
    }

    /// Move up to `max_messages` messages from the DLQ to the main queue.
    ///
    /// Failed messages count toward `max_messages` and stay in the DLQ.
    pub async fn run(&self, max_messages: usize) -> Result<RedriveResult, RedriveError> {
        let mut run = Run::default();
        info!(
            dlq = %self.dlq.name(),
            main = %self.main.name(),
            max_messages,
            "Starting DLQ redrive"
        );

        run.advance(RedriveState::Receiving);
        let depth = match self.dlq.approximate_len().await {
            Ok(depth) => depth,
            Err(e) => return Err(run.fail(e)),
        };
        info!(depth, "Approximate messages in DLQ");

        if depth == 0 {
            run.result.dlq_empty = true;
            run.advance(RedriveState::Reporting);
            return Ok(run.finish());
        }

        while run.result.attempted() < max_messages {
            let want = (max_messages - run.result.attempted()).min(MAX_RECEIVE_BATCH);
            let batch = match self.dlq.receive(want).await {
                Ok(batch) => batch,
                Err(e) => return Err(run.fail(e)),
            };
            if batch.is_empty() {
                debug!("No more messages available in DLQ");
                break;
            }

            run.advance(RedriveState::Redriving);
            debug!(count = batch.len(), "Received batch from DLQ");
            for message in &batch {
                match self.redrive_one(message).await {
                    Ok(()) => {
                        run.result.redriven_count += 1;
                        info!(
                            message_id = %message.message_id,
                            redriven = run.result.redriven_count,
                            max_messages,
                            "Message redriven"
                        );
                    }
                    Err(reason) => {
                        let failure = RedriveFailure {
                            message_id: message.message_id.clone(),
                            reason,
                        };
                        error!(message_id = %failure.message_id, "{}", failure);
                        run.result.failed_count += 1;
                        run.result.errors.push(failure);
                    }
                }
            }
            run.advance(RedriveState::Receiving);
        }

        run.advance(RedriveState::Reporting);
        Ok(run.finish())
    }

    async fn redrive_one(&self, message: &ReceivedMessage) -> Result<(), String> {
        self.main
            .send(message.to_outgoing())
            .await
            .map_err(|e| format!("send to main queue: {}", e))?;
        // Still in the DLQ if this fails; the copy on the main queue is harmless
        self.dlq
            .delete(&message.receipt_token)
            .await
            .map_err(|e| format!("sent but not deleted from DLQ: {}", e))
    }
}

/// State tracking for one invocation
#[derive(Default)]
struct Run {
    state: RedriveState,
    result: RedriveResult,
}

impl Run {
    fn advance(&mut self, next: RedriveState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Unexpected redrive state transition");
        }
        debug!(from = %self.state, to = %next, "Redrive state");
        self.state = next;
    }

    fn fail(mut self, source: QueueError) -> RedriveError {
        error!(
            state = %self.state,
            error = %source,
            redriven = self.result.redriven_count,
            failed = self.result.failed_count,
            "DLQ redrive aborted"
        );
        self.advance(RedriveState::Reporting);
        self.advance(RedriveState::Idle);
        RedriveError {
            source,
            partial: self.result,
        }
    }

    fn finish(mut self) -> RedriveResult {
        info!(
            redriven = self.result.redriven_count,
            failed = self.result.failed_count,
            "DLQ redrive completed"
        );
        self.advance(RedriveState::Idle);
        self.result
    }
}

/// Invocation input: `{"maxMessages": 7}`, field optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedriveInvocation {
    #[serde(default)]
    pub max_messages: Option<usize>,
}

impl RedriveInvocation {
    pub fn max_messages_or(&self, default: usize) -> usize {
        self.max_messages.unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RedriveBody {
    #[serde(rename_all = "camelCase")]
    Summary {
        message: String,
        redriven_count: usize,
        failed_count: usize,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        errors: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        error: String,
        redriven_count: usize,
        failed_count: usize,
    },
}

/// Invocation output: `{"statusCode": 200, "body": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedriveResponse {
    pub status_code: u16,
    pub body: RedriveBody,
}

impl From<Result<RedriveResult, RedriveError>> for RedriveResponse {
    fn from(outcome: Result<RedriveResult, RedriveError>) -> Self {
        match outcome {
            Ok(result) => Self {
                status_code: 200,
                body: RedriveBody::Summary {
                    message: if result.dlq_empty {
                        EMPTY_DLQ_MESSAGE.to_string()
                    } else {
                        COMPLETED_MESSAGE.to_string()
                    },
                    redriven_count: result.redriven_count,
                    failed_count: result.failed_count,
                    errors: result
                        .errors
                        .iter()
                        .take(MAX_REPORTED_ERRORS)
                        .map(ToString::to_string)
                        .collect(),
                },
            },
            Err(e) => Self {
                status_code: 500,
                body: RedriveBody::Failure {
                    error: e.to_string(),
                    redriven_count: e.partial.redriven_count,
                    failed_count: e.partial.failed_count,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryQueue, OutgoingMessage, QueuePolicy, ReceiptToken};
    use async_trait::async_trait;
    use std::time::Duration;

    fn queues() -> (Arc<MemoryQueue>, Arc<MemoryQueue>) {
        let policy = QueuePolicy::default();
        (
            Arc::new(MemoryQueue::new("dlq", policy.clone())),
            Arc::new(MemoryQueue::new("main", policy)),
        )
    }

    async fn fill(queue: &MemoryQueue, n: usize) {
        for i in 1..=n {
            queue
                .send(
                    OutgoingMessage::new(format!("message-{}", i))
                        .with_attribute("webhook_type", "TRANSACTION_CREATED"),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_moves_exactly_max_messages() {
        let (dlq, main) = queues();
        fill(&dlq, 20).await;

        let result = DlqRedrive::new(dlq.clone(), main.clone()).run(7).await.unwrap();

        assert_eq!(result.redriven_count, 7);
        assert_eq!(result.failed_count, 0);
        assert_eq!(dlq.len(), 13);
        assert_eq!(main.len(), 7);
    }

    #[tokio::test]
    async fn test_more_than_one_batch() {
        let (dlq, main) = queues();
        fill(&dlq, 25).await;

        let result = DlqRedrive::new(dlq.clone(), main.clone()).run(100).await.unwrap();

        assert_eq!(result.redriven_count, 25);
        assert!(dlq.is_empty());
        assert_eq!(main.len(), 25);
    }

    #[tokio::test]
    async fn test_attributes_survive_redrive() {
        let (dlq, main) = queues();
        fill(&dlq, 1).await;

        DlqRedrive::new(dlq.clone(), main.clone()).run(10).await.unwrap();

        let received = main.receive(1).await.unwrap();
        assert_eq!(received[0].body, "message-1");
        assert_eq!(
            received[0].attributes.get("webhook_type").map(String::as_str),
            Some("TRANSACTION_CREATED")
        );
    }

    /// Main queue refusing one specific body
    struct RefusingQueue {
        inner: Arc<MemoryQueue>,
        refuse: &'static str,
    }

    #[async_trait]
    impl MessageQueue for RefusingQueue {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn send(&self, message: OutgoingMessage) -> Result<MessageId, QueueError> {
            if message.body == self.refuse {
                return Err(QueueError::Unavailable("throttled".into()));
            }
            self.inner.send(message).await
        }

        async fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
            self.inner.receive(max).await
        }

        async fn delete(&self, receipt: &ReceiptToken) -> Result<(), QueueError> {
            self.inner.delete(receipt).await
        }

        async fn change_visibility(
            &self,
            receipt: &ReceiptToken,
            timeout: Duration,
        ) -> Result<(), QueueError> {
            self.inner.change_visibility(receipt, timeout).await
        }

        async fn approximate_len(&self) -> Result<u64, QueueError> {
            self.inner.approximate_len().await
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let (dlq, main) = queues();
        fill(&dlq, 3).await;
        let refusing = Arc::new(RefusingQueue {
            inner: main.clone(),
            refuse: "message-2",
        });

        let result = DlqRedrive::new(dlq.clone(), refusing).run(10).await.unwrap();

        assert_eq!(result.redriven_count, 2);
        assert_eq!(result.failed_count, 1);
        assert_eq!(dlq.bodies(), vec!["message-2".to_string()]);
        assert_eq!(
            main.bodies(),
            vec!["message-1".to_string(), "message-3".to_string()]
        );
        assert!(result.errors[0].to_string().starts_with("Failed to redrive message"));
    }

    #[tokio::test]
    async fn test_empty_dlq() {
        let (dlq, main) = queues();

        let outcome = DlqRedrive::new(dlq, main).run(10).await;
        let response = RedriveResponse::from(outcome);

        assert_eq!(response.status_code, 200);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["body"]["message"], "No messages in DLQ");
        assert_eq!(json["body"]["redrivenCount"], 0);
        assert!(json["body"].get("errors").is_none());
    }

    #[test]
    fn test_response_caps_errors() {
        let result = RedriveResult {
            redriven_count: 1,
            failed_count: 12,
            errors: (0..12)
                .map(|i| RedriveFailure {
                    message_id: format!("m-{}", i),
                    reason: "boom".into(),
                })
                .collect(),
            dlq_empty: false,
        };

        let json = serde_json::to_value(RedriveResponse::from(Ok(result))).unwrap();
        assert_eq!(json["body"]["message"], "DLQ redrive completed");
        assert_eq!(json["body"]["failedCount"], 12);
        assert_eq!(json["body"]["errors"].as_array().unwrap().len(), 10);
        assert_eq!(json["body"]["errors"][0], "Failed to redrive message m-0: boom");
    }

    #[test]
    fn test_failure_response_shape() {
        let error = RedriveError {
            source: QueueError::Unavailable("dlq down".into()),
            partial: RedriveResult {
                redriven_count: 3,
                ..Default::default()
            },
        };

        let json = serde_json::to_value(RedriveResponse::from(Err(error))).unwrap();
        assert_eq!(json["statusCode"], 500);
        assert_eq!(json["body"]["redrivenCount"], 3);
        assert_eq!(json["body"]["failedCount"], 0);
        assert!(json["body"]["error"].as_str().unwrap().contains("dlq down"));
    }

    #[test]
    fn test_invocation_parsing() {
        let explicit: RedriveInvocation = serde_json::from_str(r#"{"maxMessages": 7}"#).unwrap();
        assert_eq!(explicit.max_messages_or(DEFAULT_MAX_MESSAGES), 7);

        let empty: RedriveInvocation = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.max_messages_or(DEFAULT_MAX_MESSAGES), 10);
    }
}
