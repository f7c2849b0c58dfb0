//! Core types used throughout the system
//!
//! Identifier aliases shared by the ingest, processor, reconcilers and mapping store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Source-system identifier (Up Bank ids are opaque strings).
///
/// # Constraints:
/// - **Immutable**: assigned by the source bank, never rewritten here
/// - Used as the unique key of every mapping row
pub type SourceId = String;

/// Target-system identifier (Lunch Money ids are positive integers).
pub type TargetId = i64;

/// Broker-assigned message identifier
pub type MessageId = String;

/// Amount in minor units (cents), signed: negative for debits.
pub type MinorUnits = i64;

/// The two identifier translation tables held by the mapping store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    Account,
    Category,
}

impl MappingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingKind::Account => "account",
            MappingKind::Category => "category",
        }
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
