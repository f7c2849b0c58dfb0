//! Up Bank API client (source side)
//!
//! JSON:API style responses: `{data: ..., links: {next}}`. Amounts are read from
//! `valueInBaseUnits` so no float parsing happens on the money path.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    ApiError, CategoryPage, SourceAccount, SourceApi, SourceCategory, SourceTransaction,
    decode_json, http_client,
};
use crate::config::ApiConfig;

/// Accounts requested per page
const ACCOUNT_PAGE_SIZE: u32 = 100;
/// Hard stop for account pagination
const MAX_ACCOUNT_PAGES: usize = 100;

pub struct UpBankClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct Single<T> {
    data: T,
}

#[derive(Deserialize)]
struct List<T> {
    data: Vec<T>,
    #[serde(default)]
    links: Links,
}

#[derive(Deserialize, Default)]
struct Links {
    next: Option<String>,
}

#[derive(Deserialize)]
struct Resource<A, R> {
    id: String,
    attributes: A,
    relationships: R,
}

#[derive(Deserialize)]
struct Relationship {
    data: Option<ResourceRef>,
}

#[derive(Deserialize)]
struct ResourceRef {
    id: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MoneyObject {
    currency_code: String,
    value_in_base_units: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionAttributes {
    description: String,
    #[serde(default)]
    message: Option<String>,
    amount: MoneyObject,
    #[serde(default)]
    round_up: Option<RoundUpObject>,
    #[serde(default)]
    created_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    settled_at: Option<DateTime<FixedOffset>>,
}

#[derive(Deserialize)]
struct RoundUpObject {
    amount: MoneyObject,
}

#[derive(Deserialize)]
struct TransactionRelationships {
    account: Relationship,
    #[serde(default)]
    category: Option<Relationship>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountAttributes {
    display_name: String,
    account_type: String,
    balance: MoneyObject,
}

#[derive(Deserialize)]
struct CategoryAttributes {
    name: String,
}

#[derive(Deserialize)]
struct CategoryRelationships {
    #[serde(default)]
    parent: Option<Relationship>,
}

type TransactionResource = Resource<TransactionAttributes, TransactionRelationships>;
type AccountResource = Resource<AccountAttributes, Option<serde_json::Value>>;
type CategoryResource = Resource<CategoryAttributes, Option<CategoryRelationships>>;

impl UpBankClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        info!(base_url = %config.base_url, "Initializing Up Bank client");
        Ok(Self {
            client: http_client(config.timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn get_json<R: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<R, ApiError> {
        debug!(url = %url, "Up Bank GET");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        decode_json(response).await
    }

    /// Pagination links are absolute; only follow ones under our base URL
    fn check_cursor<'a>(&self, cursor: &'a str) -> Result<&'a str, ApiError> {
        if cursor.starts_with(&self.base_url) {
            Ok(cursor)
        } else {
            Err(ApiError::Decode(format!(
                "pagination link outside {}: {}",
                self.base_url, cursor
            )))
        }
    }
}

fn into_transaction(resource: TransactionResource) -> Result<SourceTransaction, ApiError> {
    let account_id = resource
        .relationships
        .account
        .data
        .map(|r| r.id)
        .ok_or_else(|| ApiError::Decode(format!("transaction {} has no account", resource.id)))?;

    let attrs = resource.attributes;
    Ok(SourceTransaction {
        id: resource.id,
        account_id,
        category_id: resource
            .relationships
            .category
            .and_then(|c| c.data)
            .map(|r| r.id),
        amount_minor: attrs.amount.value_in_base_units,
        currency: attrs.amount.currency_code,
        description: attrs.description,
        message: attrs.message.filter(|m| !m.is_empty()),
        created_at: attrs.created_at,
        settled_at: attrs.settled_at,
        round_up_minor: attrs
            .round_up
            .map(|r| r.amount.value_in_base_units)
            .filter(|v| *v != 0),
    })
}

#[async_trait]
impl SourceApi for UpBankClient {
    async fn get_transaction(&self, id: &str) -> Result<SourceTransaction, ApiError> {
        let url = format!("{}/transactions/{}", self.base_url, id);
        let body: Single<TransactionResource> = self.get_json(&url).await?;
        into_transaction(body.data)
    }

    async fn list_accounts(&self) -> Result<Vec<SourceAccount>, ApiError> {
        let mut accounts = Vec::new();
        let mut url = format!("{}/accounts?page[size]={}", self.base_url, ACCOUNT_PAGE_SIZE);

        for _ in 0..MAX_ACCOUNT_PAGES {
            let page: List<AccountResource> = self.get_json(&url).await?;
            accounts.extend(page.data.into_iter().map(|r| SourceAccount {
                id: r.id,
                display_name: r.attributes.display_name,
                account_type: r.attributes.account_type,
                balance_minor: r.attributes.balance.value_in_base_units,
                currency: r.attributes.balance.currency_code,
            }));

            match page.links.next {
                Some(next) => url = self.check_cursor(&next)?.to_string(),
                None => return Ok(accounts),
            }
        }

        Err(ApiError::Decode(format!(
            "account listing exceeded {} pages",
            MAX_ACCOUNT_PAGES
        )))
    }

    async fn list_categories(&self, cursor: Option<&str>) -> Result<CategoryPage, ApiError> {
        let url = match cursor {
            Some(cursor) => self.check_cursor(cursor)?.to_string(),
            None => format!("{}/categories", self.base_url),
        };

        let page: List<CategoryResource> = self.get_json(&url).await?;
        Ok(CategoryPage {
            items: page
                .data
                .into_iter()
                .map(|r| SourceCategory {
                    id: r.id,
                    name: r.attributes.name,
                    parent_id: r
                        .relationships
                        .and_then(|rel| rel.parent)
                        .and_then(|p| p.data)
                        .map(|p| p.id),
                })
                .collect(),
            next_cursor: page.links.next,
        })
    }
}
