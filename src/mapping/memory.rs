//! In-process mapping store (tests and the `memory` storage backend)

use async_trait::async_trait;
use dashmap::DashMap;

use super::{AccountMapping, CategoryMapping, MappingError, MappingStore};
use crate::core_types::SourceId;

/// DashMap-backed mapping store with last-write-wins upserts
#[derive(Default)]
pub struct MemoryMappingStore {
    accounts: DashMap<SourceId, AccountMapping>,
    categories: DashMap<SourceId, CategoryMapping>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    /// All category mappings, sorted by source id
    pub fn categories(&self) -> Vec<CategoryMapping> {
        let mut all: Vec<CategoryMapping> =
            self.categories.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.source_category_id.cmp(&b.source_category_id));
        all
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn get_account(&self, source_id: &str) -> Result<Option<AccountMapping>, MappingError> {
        Ok(self.accounts.get(source_id).map(|e| e.value().clone()))
    }

    async fn get_category(
        &self,
        source_id: &str,
    ) -> Result<Option<CategoryMapping>, MappingError> {
        Ok(self.categories.get(source_id).map(|e| e.value().clone()))
    }

    async fn put_account(&self, mapping: &AccountMapping) -> Result<(), MappingError> {
        self.accounts
            .entry(mapping.source_account_id.clone())
            .and_modify(|existing| {
                // created_at records the first write
                let created_at = existing.created_at;
                *existing = mapping.clone();
                existing.created_at = created_at;
            })
            .or_insert_with(|| mapping.clone());
        Ok(())
    }

    async fn put_category(&self, mapping: &CategoryMapping) -> Result<(), MappingError> {
        self.categories
            .insert(mapping.source_category_id.clone(), mapping.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_account_upsert_keeps_created_at() {
        let store = MemoryMappingStore::new();
        let first = AccountMapping {
            created_at: Utc::now() - Duration::days(3),
            ..AccountMapping::new("acc_1", 1)
        };
        store.put_account(&first).await.unwrap();
        store
            .put_account(&AccountMapping::new("acc_1", 1))
            .await
            .unwrap();

        let stored = store.get_account("acc_1").await.unwrap().unwrap();
        assert_eq!(stored.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_concurrent_writers_to_one_key() {
        let store = std::sync::Arc::new(MemoryMappingStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put_category(&CategoryMapping::new("groceries", 77))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.category_count(), 1);
        assert_eq!(
            store
                .get_category("groceries")
                .await
                .unwrap()
                .unwrap()
                .target_category_id,
            77
        );
    }
}
