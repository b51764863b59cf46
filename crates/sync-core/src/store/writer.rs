//! Chunked upserts with per-chunk retry

use super::RecordStore;
use crate::config::SyncConfig;
use crate::errors::{with_retry, ErrorCategorizer, ErrorClassification, RetryContext};
use crate::models::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub request_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for WriterConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            request_timeout: config.request_timeout(),
        }
    }
}

/// Result of writing one set of records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub written: u64,
    pub failed: u64,
    /// One entry per chunk that exhausted its retries
    pub errors: Vec<ErrorClassification>,
    /// Set when a chunk failed permanently; later chunks were not attempted
    pub fatal: Option<ErrorClassification>,
}

impl BatchOutcome {
    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }
}

pub struct BatchWriter {
    store: Arc<dyn RecordStore>,
    categorizer: Arc<ErrorCategorizer>,
    retry_ctx: RetryContext,
    config: WriterConfig,
}

impl BatchWriter {
    pub fn new(
        store: Arc<dyn RecordStore>,
        categorizer: Arc<ErrorCategorizer>,
        retry_ctx: RetryContext,
        config: WriterConfig,
    ) -> Self {
        Self {
            store,
            categorizer,
            retry_ctx,
            config,
        }
    }

    /// Write `records` in sequential chunks of `batch_size`
    pub async fn upsert_batch(&self, records: &[Record]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (index, chunk) in records.chunks(self.config.batch_size).enumerate() {
            if outcome.is_fatal() {
                outcome.failed += chunk.len() as u64;
                continue;
            }

            let context = BTreeMap::from([
                ("chunk".to_string(), index.to_string()),
                ("records".to_string(), chunk.len().to_string()),
            ]);
            let store = &self.store;
            let result = with_retry(
                &self.categorizer,
                &self.retry_ctx,
                self.config.request_timeout,
                "upsert_batch",
                context,
                move || store.upsert_many(chunk),
            )
            .await;

            match result {
                Ok(counts) => {
                    debug!(chunk = index, written = counts.written, "Chunk written");
                    outcome.written += counts.written;
                    outcome.failed += counts.failed;
                }
                Err(failure) => {
                    outcome.failed += chunk.len() as u64;
                    if failure.is_permanent() {
                        error!(
                            chunk = index,
                            kind = %failure.classification.kind,
                            error = %failure.message,
                            "Chunk failed permanently, abandoning remaining chunks"
                        );
                        outcome.fatal = Some(failure.classification.clone());
                    } else {
                        warn!(
                            chunk = index,
                            attempts = failure.attempts,
                            error = %failure.message,
                            "Chunk failed after retries"
                        );
                    }
                    outcome.errors.push(failure.classification);
                }
            }
        }

        outcome
    }
}
