//! Per-run reconcile report

use serde::Serialize;
use tracing::{error, info, warn};

use crate::core_types::{MappingKind, SourceId};

/// One item that could not be reconciled this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub source_id: SourceId,
    pub reason: String,
}

/// Outcome of one reconciler run. Per-item failures land here instead of
/// failing the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub kind: MappingKind,
    /// Distinct source entities seen
    pub total: usize,
    pub already_mapped: usize,
    pub newly_mapped: usize,
    pub failed: usize,
    pub errors: Vec<ItemError>,
    /// Run stopped early at the invocation budget
    pub budget_exhausted: bool,
}

impl ReconcileReport {
    pub fn new(kind: MappingKind, total: usize) -> Self {
        Self {
            kind,
            total,
            already_mapped: 0,
            newly_mapped: 0,
            failed: 0,
            errors: Vec::new(),
            budget_exhausted: false,
        }
    }

    pub fn record_failure(&mut self, source_id: impl Into<SourceId>, reason: impl Into<String>) {
        let item = ItemError {
            source_id: source_id.into(),
            reason: reason.into(),
        };
        error!(
            kind = %self.kind,
            source_id = %item.source_id,
            reason = %item.reason,
            "Failed to reconcile item"
        );
        self.failed += 1;
        self.errors.push(item);
    }

    /// Items handled one way or another
    pub fn processed(&self) -> usize {
        self.already_mapped + self.newly_mapped + self.failed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.budget_exhausted
    }

    pub fn log_summary(&self) {
        if self.budget_exhausted {
            warn!(kind = %self.kind, "Reconcile stopped at invocation budget");
        }
        info!(
            kind = %self.kind,
            total = self.total,
            already_mapped = self.already_mapped,
            newly_mapped = self.newly_mapped,
            failed = self.failed,
            "Reconcile run complete"
        );
    }
}
