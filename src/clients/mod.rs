//! External API collaborators
//!
//! - [`SourceApi`]: the bank (read-only): transactions, accounts, categories
//! - [`TargetApi`]: the personal-finance ledger: assets, categories, transactions
//!
//! Every HTTP call carries a bounded timeout (30s max, see `ApiConfig`).

pub mod lunch_money;
pub mod up_bank;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::core_types::{MinorUnits, SourceId, TargetId};

pub use lunch_money::LunchMoneyClient;
pub use up_bank::UpBankClient;

/// Collaborator call failures
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited (HTTP 429)")]
    RateLimited,

    #[error("Server error: HTTP {0}")]
    Server(u16),

    #[error("Request rejected: HTTP {status}: {body}")]
    Client { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ApiError {
    /// Whether a later retry of the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout(_)
                | ApiError::RateLimited
                | ApiError::Server(_)
                | ApiError::Transport(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Client { status: 404, .. })
    }

    pub fn from_status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            ApiError::RateLimited
        } else if status.is_server_error() {
            ApiError::Server(status.as_u16())
        } else {
            ApiError::Client {
                status: status.as_u16(),
                body,
            }
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// Build the shared HTTP client for one collaborator
pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {}", e)))
}

/// Map non-2xx to [`ApiError`], otherwise decode the JSON body
pub(crate) async fn decode_json<R: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<R, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::from_status(status, body));
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

// ============================================================================
// Source side
// ============================================================================

/// A settled or pending transaction as the bank reports it
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTransaction {
    pub id: SourceId,
    pub account_id: SourceId,
    pub category_id: Option<SourceId>,
    /// Signed minor units, negative for debits
    pub amount_minor: MinorUnits,
    pub currency: String,
    pub description: String,
    pub message: Option<String>,
    /// Timestamps keep the bank's local offset so the calendar date is preserved
    pub created_at: Option<DateTime<FixedOffset>>,
    pub settled_at: Option<DateTime<FixedOffset>>,
    /// Round-up transferred to savings, if any
    pub round_up_minor: Option<MinorUnits>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceAccount {
    pub id: SourceId,
    pub display_name: String,
    pub account_type: String,
    pub balance_minor: MinorUnits,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceCategory {
    pub id: SourceId,
    pub name: String,
    pub parent_id: Option<SourceId>,
}

/// One page of categories plus the cursor for the next page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryPage {
    pub items: Vec<SourceCategory>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait SourceApi: Send + Sync {
    async fn get_transaction(&self, id: &str) -> Result<SourceTransaction, ApiError>;

    /// All accounts, every page
    async fn list_accounts(&self) -> Result<Vec<SourceAccount>, ApiError>;

    /// One page of categories; `None` requests the first page
    async fn list_categories(&self, cursor: Option<&str>) -> Result<CategoryPage, ApiError>;
}

// ============================================================================
// Target side
// ============================================================================

/// Asset to find by name, or create with these attributes
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRequest {
    pub name: String,
    pub type_name: String,
    pub balance_minor: MinorUnits,
    pub currency: String,
}

/// Normalized transaction ready for the target ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetTransaction {
    /// Source transaction id; the target deduplicates on it
    pub external_id: String,
    pub asset_id: TargetId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<TargetId>,
    /// Decimal string, sign preserved (negative = debit)
    pub amount: String,
    pub currency: String,
    pub payee: String,
    pub notes: String,
    pub date: NaiveDate,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Created(TargetId),
    /// A record with this `external_id` already exists; nothing was written
    AlreadyExists,
}

#[async_trait]
pub trait TargetApi: Send + Sync {
    async fn create_or_find_asset(&self, asset: &AssetRequest) -> Result<TargetId, ApiError>;

    /// With `parent`, find or create the category inside that parent group;
    /// without, find or create a top-level group.
    async fn create_or_find_category(
        &self,
        name: &str,
        parent: Option<TargetId>,
    ) -> Result<TargetId, ApiError>;

    /// Idempotent by `external_id`
    async fn post_transaction(&self, txn: &TargetTransaction) -> Result<PostOutcome, ApiError>;
}
