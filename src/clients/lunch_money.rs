//! Lunch Money API client (target side)
//!
//! Assets and categories are matched by exact name before anything is created.
//! Parent categories map to category groups; children are created inside the group.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    ApiError, AssetRequest, PostOutcome, TargetApi, TargetTransaction, decode_json, http_client,
};
use crate::config::ApiConfig;
use crate::core_types::TargetId;
use crate::money::{DEFAULT_DECIMALS, format_minor};

const SYNCED_DESCRIPTION: &str = "Synced from Up Bank";

pub struct LunchMoneyClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct AssetList {
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Deserialize)]
struct Asset {
    id: TargetId,
    name: String,
}

#[derive(Serialize)]
struct CreateAsset<'a> {
    type_name: &'a str,
    name: &'a str,
    balance: String,
    currency: String,
}

#[derive(Deserialize)]
struct CreatedAsset {
    #[serde(alias = "asset_id")]
    id: TargetId,
}

#[derive(Deserialize)]
struct CategoryList {
    #[serde(default)]
    categories: Vec<Category>,
}

#[derive(Deserialize)]
struct Category {
    id: TargetId,
    name: String,
    #[serde(default)]
    is_group: bool,
    #[serde(default)]
    group_id: Option<TargetId>,
}

#[derive(Serialize)]
struct CreateCategory<'a> {
    name: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<TargetId>,
}

#[derive(Deserialize)]
struct CreatedCategory {
    category_id: TargetId,
}

#[derive(Serialize)]
struct InsertTransactions<'a> {
    transactions: [&'a TargetTransaction; 1],
    debit_as_negative: bool,
    apply_rules: bool,
    check_for_recurring: bool,
    skip_duplicates: bool,
}

/// Insert response: `{ids: [...]}` or `{error: [...]}` (sometimes with HTTP 200)
#[derive(Deserialize)]
struct InsertResult {
    #[serde(default)]
    ids: Vec<TargetId>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Find a top-level group by name, or a child by name inside `parent`
fn find_category(categories: &[Category], name: &str, parent: Option<TargetId>) -> Option<TargetId> {
    categories
        .iter()
        .find(|c| {
            c.name == name
                && match parent {
                    Some(group) => c.group_id == Some(group),
                    None => c.is_group,
                }
        })
        .map(|c| c.id)
}

fn is_duplicate_error(error: &serde_json::Value) -> bool {
    error.to_string().to_lowercase().contains("already exists")
}

impl LunchMoneyClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        info!(base_url = %config.base_url, "Initializing Lunch Money client");
        Ok(Self {
            client: http_client(config.timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<R: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<R, ApiError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        decode_json(response).await
    }

    async fn post_json<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        decode_json(response).await
    }
}

#[async_trait]
impl TargetApi for LunchMoneyClient {
    async fn create_or_find_asset(&self, asset: &AssetRequest) -> Result<TargetId, ApiError> {
        let existing: AssetList = self.get_json("/assets").await?;
        if let Some(found) = existing.assets.iter().find(|a| a.name == asset.name) {
            debug!(name = %asset.name, asset_id = found.id, "Found existing asset");
            return Ok(found.id);
        }

        let created: CreatedAsset = self
            .post_json(
                "/assets",
                &CreateAsset {
                    type_name: &asset.type_name,
                    name: &asset.name,
                    balance: format_minor(asset.balance_minor, DEFAULT_DECIMALS),
                    currency: asset.currency.to_lowercase(),
                },
            )
            .await?;

        info!(name = %asset.name, asset_id = created.id, "Created asset");
        Ok(created.id)
    }

    async fn create_or_find_category(
        &self,
        name: &str,
        parent: Option<TargetId>,
    ) -> Result<TargetId, ApiError> {
        let existing: CategoryList = self.get_json("/categories").await?;
        if let Some(id) = find_category(&existing.categories, name, parent) {
            debug!(name = %name, category_id = id, "Found existing category");
            return Ok(id);
        }

        let path = match parent {
            Some(_) => "/categories",
            None => "/categories/group",
        };
        let created: CreatedCategory = self
            .post_json(
                path,
                &CreateCategory {
                    name,
                    description: SYNCED_DESCRIPTION,
                    group_id: parent,
                },
            )
            .await?;

        info!(name = %name, category_id = created.category_id, group_id = ?parent, "Created category");
        Ok(created.category_id)
    }

    async fn post_transaction(&self, txn: &TargetTransaction) -> Result<PostOutcome, ApiError> {
        let body = InsertTransactions {
            transactions: [txn],
            debit_as_negative: true,
            apply_rules: true,
            check_for_recurring: true,
            skip_duplicates: true,
        };
        let result: InsertResult = self.post_json("/transactions", &body).await?;

        if let Some(error) = result.error {
            if is_duplicate_error(&error) {
                debug!(external_id = %txn.external_id, "Transaction already exists");
                return Ok(PostOutcome::AlreadyExists);
            }
            warn!(external_id = %txn.external_id, error = %error, "Transaction rejected");
            return Err(ApiError::Client {
                status: 200,
                body: error.to_string(),
            });
        }

        // skip_duplicates drops the row silently and returns no id
        match result.ids.first() {
            Some(id) => Ok(PostOutcome::Created(*id)),
            None => Ok(PostOutcome::AlreadyExists),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> Vec<Category> {
        serde_json::from_str::<CategoryList>(
            r#"{"categories": [
                {"id": 1, "name": "Good Life", "is_group": true, "group_id": null},
                {"id": 2, "name": "Restaurants & Cafes", "is_group": false, "group_id": 1},
                {"id": 3, "name": "Restaurants & Cafes", "is_group": false, "group_id": 9},
                {"id": 4, "name": "Uncategorised", "is_group": false}
            ]}"#,
        )
        .unwrap()
        .categories
    }

    #[test]
    fn test_find_group_by_name() {
        assert_eq!(find_category(&categories(), "Good Life", None), Some(1));
        assert_eq!(find_category(&categories(), "Missing", None), None);
    }

    #[test]
    fn test_plain_category_is_not_a_group() {
        // An ungrouped category with a parent's name must not receive children
        assert_eq!(find_category(&categories(), "Uncategorised", None), None);

        let home: Vec<Category> = serde_json::from_str::<CategoryList>(
            r#"{"categories": [{"id": 4, "name": "Home", "is_group": false, "group_id": null}]}"#,
        )
        .unwrap()
        .categories;
        assert_eq!(find_category(&home, "Home", None), None);
    }

    #[test]
    fn test_find_child_inside_group() {
        assert_eq!(
            find_category(&categories(), "Restaurants & Cafes", Some(1)),
            Some(2)
        );
        assert_eq!(
            find_category(&categories(), "Restaurants & Cafes", Some(9)),
            Some(3)
        );
        // Same name in another group does not match
        assert_eq!(
            find_category(&categories(), "Restaurants & Cafes", Some(5)),
            None
        );
    }

    #[test]
    fn test_created_asset_accepts_either_id_field() {
        let a: CreatedAsset = serde_json::from_str(r#"{"asset_id": 42}"#).unwrap();
        assert_eq!(a.id, 42);
        let a: CreatedAsset = serde_json::from_str(r#"{"id": 43, "name": "Spending"}"#).unwrap();
        assert_eq!(a.id, 43);
    }

    #[test]
    fn test_duplicate_error_detection() {
        let err = serde_json::json!(["Key (external_id)=(txn_1) already exists."]);
        assert!(is_duplicate_error(&err));
        assert!(!is_duplicate_error(&serde_json::json!(["Invalid date"])));
    }
}
