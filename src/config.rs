use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::broker::{MAX_RECEIVE_BATCH, QueuePolicy};

/// Upper bound on any outbound HTTP call
pub const MAX_HTTP_TIMEOUT_SECS: u64 = 30;

/// Upper bound on any single PostgreSQL statement
pub const MAX_STATEMENT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing secret: environment variable {0} is not set")]
    MissingSecret(String),

    #[error("Invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub webhook: WebhookConfig,
    pub source_api: ApiConfig,
    pub target_api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub redrive: RedriveConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhookConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    /// Name of the environment variable holding the shared HMAC secret
    pub secret_env: String,
    #[serde(skip)]
    pub secret: String,
    /// Accept requests without a valid signature.
    /// Rejected by `validate()` unless built with the `insecure-webhooks` feature.
    #[serde(default)]
    pub allow_unsigned: bool,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Name of the environment variable holding the bearer token
    pub api_key_env: String,
    #[serde(skip)]
    pub api_key: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process queues and mapping store; state is lost on exit
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Create tables on startup (postgres backend)
    #[serde(default)]
    pub init_schema: bool,
    /// Name of the environment variable holding the PostgreSQL URL
    #[serde(default = "default_postgres_url_env")]
    pub postgres_url_env: String,
    #[serde(skip)]
    pub postgres_url: String,
    /// Server-side limit on any single broker or mapping statement
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            init_schema: false,
            postgres_url_env: default_postgres_url_env(),
            postgres_url: String::new(),
            statement_timeout_secs: default_statement_timeout_secs(),
        }
    }
}

impl StorageConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueConfig {
    pub main_queue: String,
    pub dead_letter_queue: String,
    pub visibility_timeout_secs: u64,
    pub max_receive_count: u32,
    pub retention_days: u64,
    pub receive_batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            main_queue: "ledger-sync-main".to_string(),
            dead_letter_queue: "ledger-sync-dlq".to_string(),
            visibility_timeout_secs: 300,
            max_receive_count: 5,
            retention_days: 14,
            receive_batch_size: MAX_RECEIVE_BATCH,
        }
    }
}

impl QueueConfig {
    pub fn policy(&self) -> QueuePolicy {
        QueuePolicy {
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            max_receive_count: self.max_receive_count,
            retention: Duration::from_secs(self.retention_days * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessorConfig {
    /// Time budget for one batch invocation
    pub budget_secs: u64,
    /// Visibility extension applied when a mapping is not yet reconciled
    pub reconcile_backoff_secs: u64,
    /// Idle wait between empty receives in `--worker` mode
    pub poll_interval_ms: u64,
    /// Messages processed concurrently within one batch
    pub max_concurrency: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            budget_secs: 300,
            reconcile_backoff_secs: 3600,
            poll_interval_ms: 1000,
            max_concurrency: MAX_RECEIVE_BATCH,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconcilerConfig {
    pub budget_secs: u64,
    /// Give up paginating after this many pages
    pub max_pages: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            budget_secs: 300,
            max_pages: 1000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RedriveConfig {
    pub default_max_messages: usize,
}

impl Default for RedriveConfig {
    fn default() -> Self {
        Self {
            default_max_messages: 10,
        }
    }
}

/// Periodic jobs in `--worker` mode. An interval of 0 disables the job.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScheduleConfig {
    pub accounts_interval_secs: u64,
    pub categories_interval_secs: u64,
    pub redrive_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            accounts_interval_secs: 24 * 60 * 60,
            categories_interval_secs: 24 * 60 * 60,
            redrive_interval_secs: 0,
        }
    }
}

fn default_signature_header() -> String {
    "X-Up-Authenticity-Signature".to_string()
}

fn default_max_body_bytes() -> usize {
    256 * 1024
}

fn default_http_timeout_secs() -> u64 {
    MAX_HTTP_TIMEOUT_SECS
}

fn default_postgres_url_env() -> String {
    "DATABASE_URL".to_string()
}

fn default_statement_timeout_secs() -> u64 {
    MAX_STATEMENT_TIMEOUT_SECS
}

impl AppConfig {
    /// Load `config/{env}.yaml`, resolve secrets from the environment and validate.
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;

        let mut config = Self::from_yaml(&content)?;
        config.resolve_secrets(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Fill secret fields from the variables named in the file.
    pub fn resolve_secrets<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingSecret(name.to_string()))
        };

        self.source_api.api_key = require(&self.source_api.api_key_env)?;
        self.target_api.api_key = require(&self.target_api.api_key_env)?;

        match require(&self.webhook.secret_env) {
            Ok(secret) => self.webhook.secret = secret,
            Err(e) if !self.webhook.allow_unsigned => return Err(e),
            Err(_) => {}
        }

        if self.storage.backend == StorageBackend::Postgres {
            self.storage.postgres_url = require(&self.storage.postgres_url_env)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        for (field, api) in [("source_api", &self.source_api), ("target_api", &self.target_api)] {
            if api.base_url.is_empty() {
                return Err(invalid(field, "base_url must not be empty"));
            }
            if !(1..=MAX_HTTP_TIMEOUT_SECS).contains(&api.http_timeout_secs) {
                return Err(invalid(
                    field,
                    format!("http_timeout_secs must be in 1..={}", MAX_HTTP_TIMEOUT_SECS),
                ));
            }
        }

        if self.webhook.allow_unsigned && !cfg!(feature = "insecure-webhooks") {
            return Err(invalid(
                "webhook.allow_unsigned",
                "requires a build with the `insecure-webhooks` feature",
            ));
        }
        if !self.webhook.allow_unsigned && self.webhook.secret.is_empty() {
            return Err(invalid("webhook.secret_env", "webhook secret is empty"));
        }

        if !(1..=MAX_RECEIVE_BATCH).contains(&self.queue.receive_batch_size) {
            return Err(invalid(
                "queue.receive_batch_size",
                format!("must be in 1..={}", MAX_RECEIVE_BATCH),
            ));
        }
        if self.queue.max_receive_count == 0 {
            return Err(invalid("queue.max_receive_count", "must be at least 1"));
        }
        if self.queue.retention_days == 0 {
            return Err(invalid("queue.retention_days", "must be at least 1"));
        }
        if self.queue.main_queue == self.queue.dead_letter_queue {
            return Err(invalid(
                "queue.dead_letter_queue",
                "must differ from main_queue",
            ));
        }
        if self.processor.max_concurrency == 0 {
            return Err(invalid("processor.max_concurrency", "must be at least 1"));
        }
        if self.storage.backend == StorageBackend::Postgres {
            if self.storage.postgres_url.is_empty() {
                return Err(invalid(
                    "storage.postgres_url_env",
                    "postgres URL is empty",
                ));
            }
            if !(1..=MAX_STATEMENT_TIMEOUT_SECS).contains(&self.storage.statement_timeout_secs) {
                return Err(invalid(
                    "storage.statement_timeout_secs",
                    format!("must be in 1..={}", MAX_STATEMENT_TIMEOUT_SECS),
                ));
            }
        }
        Ok(())
    }
}
