//! Mapping Store
//!
//! Persistent translation between source-bank and target-ledger identifiers.
//!
//! # Safety Invariants
//!
//! 1. **Unique key**: one row per source id and kind; writes are upserts keyed by it
//! 2. **No deletion**: mappings persist indefinitely, there is no delete operation
//! 3. **Last write wins**: concurrent writers to one key are safe because every
//!    writer derives the same target id from the same create-or-find call
//! 4. **Parents first**: a category mapping only carries `target_parent_id` once the
//!    parent's own mapping exists

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core_types::{MappingKind, SourceId, TargetId};

pub use memory::MemoryMappingStore;
pub use pg::PgMappingStore;

/// Mapping store errors
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Mapping store unavailable: {0}")]
    Unavailable(String),
}

/// Source account → target asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMapping {
    pub source_account_id: SourceId,
    pub target_asset_id: TargetId,
    pub account_name: Option<String>,
    pub account_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AccountMapping {
    pub fn new(source_account_id: impl Into<SourceId>, target_asset_id: TargetId) -> Self {
        Self {
            source_account_id: source_account_id.into(),
            target_asset_id,
            account_name: None,
            account_type: None,
            created_at: Utc::now(),
        }
    }
}

/// Source category → target category, with the resolved parent link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMapping {
    pub source_category_id: SourceId,
    pub target_category_id: TargetId,
    pub source_parent_id: Option<SourceId>,
    pub target_parent_id: Option<TargetId>,
    pub category_name: Option<String>,
}

impl CategoryMapping {
    pub fn new(source_category_id: impl Into<SourceId>, target_category_id: TargetId) -> Self {
        Self {
            source_category_id: source_category_id.into(),
            target_category_id,
            source_parent_id: None,
            target_parent_id: None,
            category_name: None,
        }
    }
}

/// Identifier mapping store.
///
/// Reconcilers are the only writers; the processor only reads.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get_account(&self, source_id: &str) -> Result<Option<AccountMapping>, MappingError>;

    async fn get_category(&self, source_id: &str)
    -> Result<Option<CategoryMapping>, MappingError>;

    /// Upsert keyed by `source_account_id`
    async fn put_account(&self, mapping: &AccountMapping) -> Result<(), MappingError>;

    /// Upsert keyed by `source_category_id`
    async fn put_category(&self, mapping: &CategoryMapping) -> Result<(), MappingError>;

    /// Kind-generic lookup of the target id
    async fn get(&self, kind: MappingKind, source_id: &str) -> Result<Option<TargetId>, MappingError> {
        Ok(match kind {
            MappingKind::Account => self
                .get_account(source_id)
                .await?
                .map(|m| m.target_asset_id),
            MappingKind::Category => self
                .get_category(source_id)
                .await?
                .map(|m| m.target_category_id),
        })
    }

    /// Kind-generic upsert.
    ///
    /// For categories with a parent, `target_parent_id` is resolved from the
    /// parent's mapping and left empty if the parent is not mapped yet.
    async fn put(
        &self,
        kind: MappingKind,
        source_id: &str,
        target_id: TargetId,
        parent_source_id: Option<&str>,
    ) -> Result<(), MappingError> {
        match kind {
            MappingKind::Account => {
                self.put_account(&AccountMapping::new(source_id, target_id))
                    .await
            }
            MappingKind::Category => {
                let target_parent_id = match parent_source_id {
                    Some(parent) => self
                        .get_category(parent)
                        .await?
                        .map(|m| m.target_category_id),
                    None => None,
                };
                self.put_category(&CategoryMapping {
                    source_parent_id: parent_source_id.map(str::to_string),
                    target_parent_id,
                    ..CategoryMapping::new(source_id, target_id)
                })
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generic_get_put_account() {
        let store = MemoryMappingStore::new();
        assert_eq!(store.get(MappingKind::Account, "acc_1").await.unwrap(), None);

        store
            .put(MappingKind::Account, "acc_1", 42, None)
            .await
            .unwrap();
        assert_eq!(
            store.get(MappingKind::Account, "acc_1").await.unwrap(),
            Some(42)
        );
        // Kinds are separate tables
        assert_eq!(store.get(MappingKind::Category, "acc_1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_generic_put_resolves_parent() {
        let store = MemoryMappingStore::new();
        store
            .put(MappingKind::Category, "good-life", 10, None)
            .await
            .unwrap();
        store
            .put(MappingKind::Category, "restaurants", 11, Some("good-life"))
            .await
            .unwrap();

        let child = store.get_category("restaurants").await.unwrap().unwrap();
        assert_eq!(child.source_parent_id.as_deref(), Some("good-life"));
        assert_eq!(child.target_parent_id, Some(10));
    }

    #[tokio::test]
    async fn test_generic_put_with_unmapped_parent() {
        let store = MemoryMappingStore::new();
        store
            .put(MappingKind::Category, "orphan", 5, Some("missing"))
            .await
            .unwrap();

        let child = store.get_category("orphan").await.unwrap().unwrap();
        assert_eq!(child.source_parent_id.as_deref(), Some("missing"));
        assert_eq!(child.target_parent_id, None);
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_target_per_source() {
        let store = MemoryMappingStore::new();
        store.put(MappingKind::Account, "acc_1", 1, None).await.unwrap();
        store.put(MappingKind::Account, "acc_1", 2, None).await.unwrap();

        assert_eq!(store.account_count(), 1);
        assert_eq!(store.get(MappingKind::Account, "acc_1").await.unwrap(), Some(2));
    }
}
