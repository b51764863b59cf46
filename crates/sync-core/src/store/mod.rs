//! Destination store
//!
//! This module provides:
//! - The `RecordStore` seam batches are written through
//! - A SQLite implementation keyed by record id
//! - The `BatchWriter` that chunks and retries writes

mod sqlite;
mod writer;

pub use sqlite::{SqliteRecordStore, SqliteStoreConfig, StoreError};
pub use writer::{BatchOutcome, BatchWriter, WriterConfig};

use crate::models::Record;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-call write counts reported by a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub written: u64,
    /// Records the store refused individually
    pub failed: u64,
}

/// A store that can upsert records by id
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or update every record; replaying the same records is a no-op
    async fn upsert_many(&self, records: &[Record]) -> Result<UpsertCounts>;

    /// Delete records dated before `cutoff`, returning how many went
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn health_check(&self) -> Result<()>;
}
