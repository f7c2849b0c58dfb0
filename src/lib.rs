//! ledger_sync - Up Bank → Lunch Money reconciliation pipeline
//!
//! Bank transactions arrive as signed webhooks, are queued with at-least-once
//! delivery, and are synced idempotently to the personal-finance ledger.
//!
//! ```text
//! Up Bank ──webhook──▶ WebhookIngest ──▶ main queue ──▶ Processor ──▶ Lunch Money
//!                                            │  ▲            │
//!                                  exhausted ▼  │ redrive    ▼ reads
//!                                          DLQ ─┘       MappingStore ◀── Reconcilers
//! ```
//!
//! # Modules
//!
//! - [`config`] - YAML configuration, secrets, validation
//! - [`logging`] - tracing subscriber setup
//! - [`core_types`] - identifier aliases and `MappingKind`
//! - [`money`] - minor-unit amount formatting
//! - [`event`] - transaction events, webhook notifications, queue envelopes
//! - [`db`] - PostgreSQL pool and schema
//! - [`broker`] - `MessageQueue` trait with memory and PostgreSQL brokers
//! - [`mapping`] - source ⇄ target identifier store
//! - [`clients`] - Up Bank and Lunch Money API clients
//! - [`webhook`] - HMAC verification and the axum ingest router
//! - [`processor`] - per-message sync and the consume loop
//! - [`reconcile`] - account and category reconcilers
//! - [`redrive`] - DLQ redrive

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod logging;
pub mod money;

pub mod broker;
pub mod db;
pub mod event;
pub mod mapping;

pub mod clients;
pub mod processor;
pub mod reconcile;
pub mod redrive;
pub mod webhook;

// Convenient re-exports at crate root
pub use broker::{MemoryQueue, MessageQueue, QueueError};
pub use config::AppConfig;
pub use core_types::{MappingKind, MessageId, MinorUnits, SourceId, TargetId};
pub use event::{EventType, QueueEnvelope, TransactionEvent};
pub use mapping::{MappingStore, MemoryMappingStore};
pub use processor::{BatchReport, Processor, ProcessorSettings};
pub use reconcile::{AccountReconciler, CategoryReconciler, ReconcileReport};
pub use redrive::{DlqRedrive, RedriveResult};
pub use webhook::WebhookIngest;
