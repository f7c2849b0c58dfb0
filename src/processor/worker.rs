//! Processor Worker
//!
//! Long-running consumer that drains the main queue batch by batch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::{BatchReport, Processor};
use crate::config::ProcessorConfig;

/// Configuration for the processor worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty or unreachable
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
        }
    }
}

impl From<&ProcessorConfig> for WorkerConfig {
    fn from(config: &ProcessorConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

pub struct ProcessorWorker {
    processor: Arc<Processor>,
    config: WorkerConfig,
}

impl ProcessorWorker {
    pub fn new(processor: Arc<Processor>, config: WorkerConfig) -> Self {
        Self { processor, config }
    }

    pub fn with_defaults(processor: Arc<Processor>) -> Self {
        Self::new(processor, WorkerConfig::default())
    }

    /// Run the consume loop forever
    pub async fn run(&self) -> ! {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.processor.settings().batch_size,
            max_concurrency = self.processor.settings().max_concurrency,
            "Starting processor worker"
        );

        loop {
            if !self.tick().await {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }

    /// One poll. Returns true when a batch was received, so the loop polls again at once.
    pub async fn tick(&self) -> bool {
        match self.processor.run_once().await {
            Ok(BatchReport { received: 0, .. }) => {
                debug!("Main queue empty");
                false
            }
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Failed to receive from main queue");
                false
            }
        }
    }
}
