//! Reconcilers
//!
//! Batch jobs that walk a full source entity list and make sure every entity
//! has a target counterpart and a mapping row.
//!
//! ```text
//! accounts:   list all ──▶ mapped? ──no──▶ create-or-find asset ──▶ put mapping
//! categories: collect all pages ──▶ pass 1: parents ──▶ pass 2: children (until no progress)
//! ```
//!
//! Only a failed listing aborts a run. Everything per item is collected in a
//! [`ReconcileReport`].

pub mod accounts;
pub mod categories;
pub mod report;

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

pub use accounts::AccountReconciler;
pub use categories::CategoryReconciler;
pub use report::{ItemError, ReconcileReport};

use crate::clients::ApiError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to list source {entity}: {source}")]
    Listing {
        entity: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("Category listing exceeded {0} pages")]
    PageLimit(usize),
}

/// Run-wide time budget
#[derive(Debug, Clone, Copy)]
pub(crate) struct Budget {
    deadline: Instant,
}

impl Budget {
    pub(crate) fn start(limit: Duration) -> Self {
        Self {
            deadline: Instant::now() + limit,
        }
    }

    pub(crate) fn exhausted(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
