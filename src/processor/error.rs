//! Per-message processing errors.
//!
//! None of these are fatal to a batch. Every variant leaves the message
//! unacknowledged; they differ in how soon the broker redelivers it.

use thiserror::Error;

use crate::clients::ApiError;
use crate::core_types::{MappingKind, SourceId};
use crate::mapping::MappingError;

#[derive(Debug, Error)]
pub enum ProcessError {
    /// Timeout, rate limit, 5xx or store outage. Redelivered after the
    /// visibility timeout.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The reconcilers have not mapped this id yet. Redelivery is deferred by
    /// the reconcile backoff instead of the visibility timeout.
    #[error("No {kind} mapping for source id {source_id}")]
    UnresolvedMapping { kind: MappingKind, source_id: SourceId },

    /// Body is not a transaction event
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// A collaborator refused the request (4xx, undecodable response)
    #[error("Rejected by collaborator: {0}")]
    Rejected(String),
}

impl ProcessError {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::UnresolvedMapping { .. } => "unresolved_mapping",
            Self::Malformed(_) => "malformed",
            Self::Rejected(_) => "rejected",
        }
    }
}

impl From<ApiError> for ProcessError {
    fn from(e: ApiError) -> Self {
        if e.is_transient() {
            ProcessError::Transient(e.to_string())
        } else {
            ProcessError::Rejected(e.to_string())
        }
    }
}

impl From<MappingError> for ProcessError {
    fn from(e: MappingError) -> Self {
        ProcessError::Transient(e.to_string())
    }
}
