//! Transaction Processor
//!
//! Consumes main-queue batches and syncs each transaction to the target ledger.
//!
//! # Per-message flow
//!
//! ```text
//! decode ──▶ skip? ──▶ fetch source txn ──▶ resolve mappings ──▶ transform ──▶ post ──▶ ack
//!   │          │              │                    │                            │
//!   │        ack         Transient/Rejected   UnresolvedMapping           Transient/Rejected
//!   ▼                         ▼                    ▼                            ▼
//! Malformed              (no ack)        visibility = reconcile backoff      (no ack)
//! ```
//!
//! # Invariants
//!
//! 1. **Isolation**: one message's failure never fails or blocks its siblings
//! 2. **Idempotence**: every target write is keyed by the source transaction id,
//!    so redelivery and DLQ redrive never duplicate a record
//! 3. **Bounded**: a batch stops at the invocation budget; unfinished messages stay
//!    unacknowledged and are redelivered

pub mod error;
pub mod transform;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub use error::ProcessError;
pub use worker::ProcessorWorker;

use crate::broker::{MessageQueue, QueueError, ReceivedMessage};
use crate::clients::{PostOutcome, SourceApi, SourceTransaction, TargetApi};
use crate::config::{ProcessorConfig, QueueConfig};
use crate::core_types::MappingKind;
use crate::event::{EventType, QueueEnvelope};
use crate::mapping::MappingStore;
use transform::ResolvedMappings;

/// Processor tuning
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Time budget for one batch
    pub budget: Duration,
    /// Visibility applied to messages waiting on a reconciler
    pub reconcile_backoff: Duration,
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// Broker delivery budget, used to flag last attempts in logs
    pub max_receive_count: u32,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::from_config(&ProcessorConfig::default(), &QueueConfig::default())
    }
}

impl ProcessorSettings {
    pub fn from_config(processor: &ProcessorConfig, queue: &QueueConfig) -> Self {
        Self {
            budget: Duration::from_secs(processor.budget_secs),
            reconcile_backoff: Duration::from_secs(processor.reconcile_backoff_secs),
            batch_size: queue.receive_batch_size,
            max_concurrency: processor.max_concurrency.max(1),
            max_receive_count: queue.max_receive_count,
        }
    }
}

/// Result of one successfully handled message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Records posted (`created`) or found already present (`existing`)
    Synced { created: usize, existing: usize },
    /// Event type with nothing to sync
    Skipped(EventType),
}

/// Counts for one batch invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub synced: usize,
    pub skipped: usize,
    /// Waiting on a mapping; visibility extended
    pub deferred: usize,
    pub failed: usize,
    /// Still running when the budget ran out
    pub unfinished: usize,
}

impl BatchReport {
    fn record(&mut self, result: &Result<MessageOutcome, ProcessError>) {
        match result {
            Ok(MessageOutcome::Synced { .. }) => self.synced += 1,
            Ok(MessageOutcome::Skipped(_)) => self.skipped += 1,
            Err(ProcessError::UnresolvedMapping { .. }) => self.deferred += 1,
            Err(_) => self.failed += 1,
        }
    }

    /// Messages acknowledged in this batch
    pub fn acknowledged(&self) -> usize {
        self.synced + self.skipped
    }
}

pub struct Processor {
    queue: Arc<dyn MessageQueue>,
    source: Arc<dyn SourceApi>,
    target: Arc<dyn TargetApi>,
    mappings: Arc<dyn MappingStore>,
    settings: ProcessorSettings,
}

impl Processor {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        source: Arc<dyn SourceApi>,
        target: Arc<dyn TargetApi>,
        mappings: Arc<dyn MappingStore>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            queue,
            source,
            target,
            mappings,
            settings,
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Receive one batch and process it.
    ///
    /// Only a failed receive is an error; per-message failures are in the report.
    pub async fn run_once(&self) -> Result<BatchReport, QueueError> {
        let batch = self.queue.receive(self.settings.batch_size).await?;
        if batch.is_empty() {
            debug!(queue = %self.queue.name(), "No messages received");
            return Ok(BatchReport::default());
        }
        Ok(self.process_batch(batch).await)
    }

    /// Process messages concurrently within the invocation budget.
    pub async fn process_batch(&self, messages: Vec<ReceivedMessage>) -> BatchReport {
        let deadline = Instant::now() + self.settings.budget;
        let mut report = BatchReport {
            received: messages.len(),
            ..Default::default()
        };

        let mut results = futures::stream::iter(messages)
            .map(|message| self.handle(message))
            .buffer_unordered(self.settings.max_concurrency);

        let mut finished = 0;
        loop {
            match tokio::time::timeout_at(deadline, results.next()).await {
                Ok(Some(result)) => {
                    report.record(&result);
                    finished += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    report.unfinished = report.received - finished;
                    warn!(
                        unfinished = report.unfinished,
                        budget_secs = self.settings.budget.as_secs(),
                        "Invocation budget exhausted, leaving messages for redelivery"
                    );
                    break;
                }
            }
        }

        info!(
            received = report.received,
            synced = report.synced,
            skipped = report.skipped,
            deferred = report.deferred,
            failed = report.failed,
            unfinished = report.unfinished,
            "Batch processed"
        );
        report
    }

    /// Process one message and settle it with the broker
    async fn handle(&self, message: ReceivedMessage) -> Result<MessageOutcome, ProcessError> {
        let result = self.process_message(&message).await;
        let message_id = &message.message_id;

        match &result {
            Ok(outcome) => {
                debug!(message_id = %message_id, outcome = ?outcome, "Message done");
                // A failed ack means redelivery, which the idempotent path absorbs
                if let Err(e) = self.queue.delete(&message.receipt_token).await {
                    warn!(message_id = %message_id, error = %e, "Failed to acknowledge message");
                }
            }
            Err(e @ ProcessError::UnresolvedMapping { .. }) => {
                warn!(
                    message_id = %message_id,
                    delivery_count = message.delivery_count,
                    backoff_secs = self.settings.reconcile_backoff.as_secs(),
                    error = %e,
                    "Mapping not reconciled yet, deferring message"
                );
                if let Err(qe) = self
                    .queue
                    .change_visibility(&message.receipt_token, self.settings.reconcile_backoff)
                    .await
                {
                    warn!(message_id = %message_id, error = %qe, "Failed to extend visibility");
                }
            }
            Err(e) => {
                if message.is_final_attempt(self.settings.max_receive_count) {
                    error!(
                        message_id = %message_id,
                        delivery_count = message.delivery_count,
                        kind = e.label(),
                        error = %e,
                        "Processing failed on final attempt, message will be dead-lettered"
                    );
                } else {
                    warn!(
                        message_id = %message_id,
                        delivery_count = message.delivery_count,
                        kind = e.label(),
                        error = %e,
                        "Processing failed, leaving message for redelivery"
                    );
                }
            }
        }
        result
    }

    async fn process_message(
        &self,
        message: &ReceivedMessage,
    ) -> Result<MessageOutcome, ProcessError> {
        let envelope =
            QueueEnvelope::decode(message).map_err(|e| ProcessError::Malformed(e.to_string()))?;
        let event = &envelope.body;

        if !event.event_type.is_sync() {
            info!(
                message_id = %envelope.message_id,
                event_type = %event.event_type,
                "Ignoring event type"
            );
            return Ok(MessageOutcome::Skipped(event.event_type));
        }

        let txn = self
            .source
            .get_transaction(&event.source_transaction_id)
            .await?;
        if txn.account_id != event.source_account_id {
            debug!(
                source_transaction_id = %txn.id,
                event_account = %event.source_account_id,
                source_account = %txn.account_id,
                "Account differs from notification, using source API value"
            );
        }

        let mappings = self.resolve_mappings(&txn).await?;
        let records = transform::to_target(&txn, event.occurred_at, mappings);

        let (mut created, mut existing) = (0, 0);
        for record in &records {
            match self.target.post_transaction(record).await? {
                PostOutcome::Created(target_id) => {
                    created += 1;
                    info!(
                        message_id = %envelope.message_id,
                        external_id = %record.external_id,
                        target_id,
                        amount = %record.amount,
                        "Transaction synced"
                    );
                }
                PostOutcome::AlreadyExists => {
                    existing += 1;
                    info!(
                        message_id = %envelope.message_id,
                        external_id = %record.external_id,
                        "Transaction already synced"
                    );
                }
            }
        }

        Ok(MessageOutcome::Synced { created, existing })
    }

    /// Account mapping is always required; category only when the transaction has one
    async fn resolve_mappings(
        &self,
        txn: &SourceTransaction,
    ) -> Result<ResolvedMappings, ProcessError> {
        let asset_id = self
            .mappings
            .get(MappingKind::Account, &txn.account_id)
            .await?
            .ok_or_else(|| ProcessError::UnresolvedMapping {
                kind: MappingKind::Account,
                source_id: txn.account_id.clone(),
            })?;

        let category_id = match &txn.category_id {
            Some(category) => Some(
                self.mappings
                    .get(MappingKind::Category, category)
                    .await?
                    .ok_or_else(|| ProcessError::UnresolvedMapping {
                        kind: MappingKind::Category,
                        source_id: category.clone(),
                    })?,
            ),
            None => None,
        };

        Ok(ResolvedMappings {
            asset_id,
            category_id,
        })
    }
}
