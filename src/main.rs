//! ledger_sync - Up Bank → Lunch Money sync pipeline
//!
//! Entry point. One process runs one mode:
//!
//! ```text
//! --webhook           POST /webhook ──▶ main queue
//! --worker            main queue ──▶ Processor ──▶ Lunch Money
//!                     + periodic reconcilers / redrive
//! --serve             --webhook and --worker in one process (memory backend)
//! --sync-accounts     Account reconciler, once
//! --sync-categories   Category reconciler, once
//! --redrive [N]       DLQ ──▶ main queue, at most N messages
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::{error, info};

use ledger_sync::broker::{MemoryQueue, MessageQueue, PgQueue};
use ledger_sync::clients::{LunchMoneyClient, SourceApi, TargetApi, UpBankClient};
use ledger_sync::config::{AppConfig, StorageBackend};
use ledger_sync::db::Database;
use ledger_sync::mapping::{MappingStore, MemoryMappingStore, PgMappingStore};
use ledger_sync::processor::worker::WorkerConfig;
use ledger_sync::processor::{Processor, ProcessorSettings, ProcessorWorker};
use ledger_sync::reconcile::{AccountReconciler, CategoryReconciler};
use ledger_sync::redrive::{DlqRedrive, RedriveInvocation, RedriveResponse};
use ledger_sync::webhook::{self, WebhookIngest, WebhookState};

// ============================================================
// ARGUMENTS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Webhook,
    Worker,
    Serve,
    SyncAccounts,
    SyncCategories,
    Redrive(Option<usize>),
}

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    std::env::var("LEDGER_SYNC_ENV").unwrap_or_else(|_| "dev".to_string())
}

fn get_mode() -> anyhow::Result<Mode> {
    let args: Vec<String> = std::env::args().collect();
    for (i, arg) in args.iter().enumerate() {
        let mode = match arg.as_str() {
            "--webhook" => Mode::Webhook,
            "--worker" => Mode::Worker,
            "--serve" => Mode::Serve,
            "--sync-accounts" => Mode::SyncAccounts,
            "--sync-categories" => Mode::SyncCategories,
            "--redrive" => {
                let max = match args.get(i + 1).filter(|a| !a.starts_with('-')) {
                    Some(n) => Some(n.parse().with_context(|| format!("--redrive {}", n))?),
                    None => None,
                };
                Mode::Redrive(max)
            }
            _ => continue,
        };
        return Ok(mode);
    }
    bail!(
        "no mode given, expected one of --webhook, --worker, --serve, \
         --sync-accounts, --sync-categories, --redrive [N]"
    )
}

// ============================================================
// WIRING
// ============================================================

/// Collaborators shared by every mode, built once from config
struct Components {
    main_queue: Arc<dyn MessageQueue>,
    dead_letter: Arc<dyn MessageQueue>,
    mappings: Arc<dyn MappingStore>,
    source: Arc<dyn SourceApi>,
    target: Arc<dyn TargetApi>,
}

impl Components {
    async fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let policy = config.queue.policy();
        let (main_queue, dead_letter, mappings): (
            Arc<dyn MessageQueue>,
            Arc<dyn MessageQueue>,
            Arc<dyn MappingStore>,
        ) = match config.storage.backend {
            StorageBackend::Memory => {
                let (main, dlq) = MemoryQueue::pair(
                    &config.queue.main_queue,
                    &config.queue.dead_letter_queue,
                    policy,
                );
                (main, dlq, Arc::new(MemoryMappingStore::new()))
            }
            StorageBackend::Postgres => {
                let db = Database::connect_with_timeout(
                    &config.storage.postgres_url,
                    config.storage.statement_timeout(),
                )
                .await
                .context("Failed to connect to PostgreSQL")?;
                if config.storage.init_schema {
                    db.init_schema().await.context("Failed to initialize schema")?;
                }
                let pool = db.pool().clone();
                (
                    Arc::new(
                        PgQueue::new(pool.clone(), &config.queue.main_queue, policy.clone())
                            .with_dead_letter(&config.queue.dead_letter_queue),
                    ),
                    Arc::new(PgQueue::new(
                        pool.clone(),
                        &config.queue.dead_letter_queue,
                        policy,
                    )),
                    Arc::new(PgMappingStore::new(pool)),
                )
            }
        };

        Ok(Self {
            main_queue,
            dead_letter,
            mappings,
            source: Arc::new(UpBankClient::new(&config.source_api)?),
            target: Arc::new(LunchMoneyClient::new(&config.target_api)?),
        })
    }

    fn account_reconciler(&self, config: &AppConfig) -> AccountReconciler {
        AccountReconciler::new(
            self.source.clone(),
            self.target.clone(),
            self.mappings.clone(),
            Duration::from_secs(config.reconciler.budget_secs),
        )
    }

    fn category_reconciler(&self, config: &AppConfig) -> CategoryReconciler {
        CategoryReconciler::new(
            self.source.clone(),
            self.target.clone(),
            self.mappings.clone(),
            Duration::from_secs(config.reconciler.budget_secs),
            config.reconciler.max_pages,
        )
    }

    fn redrive(&self) -> DlqRedrive {
        DlqRedrive::new(self.dead_letter.clone(), self.main_queue.clone())
    }

    fn processor(&self, config: &AppConfig) -> Processor {
        Processor::new(
            self.main_queue.clone(),
            self.source.clone(),
            self.target.clone(),
            self.mappings.clone(),
            ProcessorSettings::from_config(&config.processor, &config.queue),
        )
    }
}

/// Run `task` every `interval_secs`, first run immediately. 0 disables.
fn spawn_every<F, Fut>(name: &'static str, interval_secs: u64, task: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if interval_secs == 0 {
        info!(task = name, "Periodic task disabled");
        return;
    }
    info!(task = name, interval_secs, "Scheduling periodic task");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            task().await;
        }
    });
}

fn schedule_background(components: &Arc<Components>, config: &Arc<AppConfig>) {
    let (c, cfg) = (components.clone(), config.clone());
    spawn_every("accounts", config.schedule.accounts_interval_secs, move || {
        let (c, cfg) = (c.clone(), cfg.clone());
        async move {
            if let Err(e) = c.account_reconciler(&cfg).run().await {
                error!(error = %e, "Scheduled account reconcile failed");
            }
        }
    });

    let (c, cfg) = (components.clone(), config.clone());
    spawn_every("categories", config.schedule.categories_interval_secs, move || {
        let (c, cfg) = (c.clone(), cfg.clone());
        async move {
            if let Err(e) = c.category_reconciler(&cfg).run().await {
                error!(error = %e, "Scheduled category reconcile failed");
            }
        }
    });

    let (c, max) = (components.clone(), config.redrive.default_max_messages);
    spawn_every("redrive", config.schedule.redrive_interval_secs, move || {
        let c = c.clone();
        async move {
            if let Err(e) = c.redrive().run(max).await {
                error!(error = %e, "Scheduled redrive failed");
            }
        }
    });
}

async fn serve_webhook(components: &Components, config: &AppConfig) -> anyhow::Result<()> {
    let ingest = WebhookIngest::from_config(&config.webhook, components.main_queue.clone());
    let state = Arc::new(WebhookState::new(ingest, &config.webhook.signature_header)?);
    webhook::run_server(&config.webhook, state).await?;
    Ok(())
}

fn processor_worker(components: &Components, config: &AppConfig) -> ProcessorWorker {
    ProcessorWorker::new(
        Arc::new(components.processor(config)),
        WorkerConfig::from(&config.processor),
    )
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = get_mode()?;
    let env = get_env();
    let config = Arc::new(
        AppConfig::load(&env).with_context(|| format!("loading config `{}`", env))?,
    );
    let _log_guard = ledger_sync::logging::init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        env = %env,
        mode = ?mode,
        backend = ?config.storage.backend,
        "Starting ledger_sync"
    );

    let components = Arc::new(Components::build(&config).await?);

    match mode {
        Mode::Webhook => serve_webhook(&components, &config).await?,
        Mode::Worker => {
            schedule_background(&components, &config);
            processor_worker(&components, &config).run().await
        }
        Mode::Serve => {
            schedule_background(&components, &config);
            let worker = processor_worker(&components, &config);
            tokio::spawn(async move {
                worker.run().await;
            });
            serve_webhook(&components, &config).await?;
        }
        Mode::SyncAccounts => {
            let report = components.account_reconciler(&config).run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Mode::SyncCategories => {
            let report = components.category_reconciler(&config).run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Mode::Redrive(max) => {
            let invocation = RedriveInvocation { max_messages: max };
            let max = invocation.max_messages_or(config.redrive.default_max_messages);
            let response = RedriveResponse::from(components.redrive().run(max).await);
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.status_code != 200 {
                bail!("DLQ redrive failed");
            }
        }
    }

    Ok(())
}
