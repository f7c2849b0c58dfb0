//! PostgreSQL mapping store
//!
//! `account_mappings` and `category_mappings`, written with `ON CONFLICT ... DO UPDATE`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{AccountMapping, CategoryMapping, MappingError, MappingStore};

pub struct PgMappingStore {
    pool: PgPool,
}

impl PgMappingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MappingStore for PgMappingStore {
    async fn get_account(&self, source_id: &str) -> Result<Option<AccountMapping>, MappingError> {
        let row = sqlx::query(
            r#"SELECT source_account_id, target_asset_id, account_name, account_type, created_at
               FROM account_mappings WHERE source_account_id = $1"#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(AccountMapping {
                source_account_id: r.try_get("source_account_id")?,
                target_asset_id: r.try_get("target_asset_id")?,
                account_name: r.try_get("account_name")?,
                account_type: r.try_get("account_type")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn get_category(
        &self,
        source_id: &str,
    ) -> Result<Option<CategoryMapping>, MappingError> {
        let row = sqlx::query(
            r#"SELECT source_category_id, target_category_id, source_parent_id,
                      target_parent_id, category_name
               FROM category_mappings WHERE source_category_id = $1"#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(CategoryMapping {
                source_category_id: r.try_get("source_category_id")?,
                target_category_id: r.try_get("target_category_id")?,
                source_parent_id: r.try_get("source_parent_id")?,
                target_parent_id: r.try_get("target_parent_id")?,
                category_name: r.try_get("category_name")?,
            })
        })
        .transpose()
    }

    async fn put_account(&self, mapping: &AccountMapping) -> Result<(), MappingError> {
        sqlx::query(
            r#"
            INSERT INTO account_mappings
                (source_account_id, target_asset_id, account_name, account_type, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (source_account_id) DO UPDATE
            SET target_asset_id = EXCLUDED.target_asset_id,
                account_name = EXCLUDED.account_name,
                account_type = EXCLUDED.account_type,
                updated_at = NOW()
            "#,
        )
        .bind(&mapping.source_account_id)
        .bind(mapping.target_asset_id)
        .bind(&mapping.account_name)
        .bind(&mapping.account_type)
        .bind(mapping.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            source_account_id = %mapping.source_account_id,
            target_asset_id = mapping.target_asset_id,
            "Account mapping saved"
        );
        Ok(())
    }

    async fn put_category(&self, mapping: &CategoryMapping) -> Result<(), MappingError> {
        sqlx::query(
            r#"
            INSERT INTO category_mappings
                (source_category_id, target_category_id, source_parent_id,
                 target_parent_id, category_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (source_category_id) DO UPDATE
            SET target_category_id = EXCLUDED.target_category_id,
                source_parent_id = EXCLUDED.source_parent_id,
                target_parent_id = EXCLUDED.target_parent_id,
                category_name = EXCLUDED.category_name,
                updated_at = NOW()
            "#,
        )
        .bind(&mapping.source_category_id)
        .bind(mapping.target_category_id)
        .bind(&mapping.source_parent_id)
        .bind(mapping.target_parent_id)
        .bind(&mapping.category_name)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            source_category_id = %mapping.source_category_id,
            target_category_id = mapping.target_category_id,
            "Category mapping saved"
        );
        Ok(())
    }
}
