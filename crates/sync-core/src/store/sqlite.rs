//! SQLite record store
//!
//! Records land in a single table keyed by their id. The full record is kept
//! as JSON next to the columns the sync itself needs (business key and the
//! primary record date used by retention cleanup).

use super::{RecordStore, UpsertCounts};
use crate::models::{Record, SanitizeRules};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid table name '{0}'")]
    InvalidTable(String),

    #[error("stored payload for '{id}' is not a JSON object")]
    CorruptPayload { id: String },
}

#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// sqlx connection URL (e.g., "sqlite:///var/lib/ordersync/orders.db")
    pub database_url: String,
    pub table: String,
    pub max_connections: u32,
    /// Fields used to derive the key columns
    pub rules: SanitizeRules,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://orders.db".to_string(),
            table: "orders".to_string(),
            max_connections: 5,
            rules: SanitizeRules::default(),
        }
    }
}

pub struct SqliteRecordStore {
    pool: SqlitePool,
    table: String,
    rules: SanitizeRules,
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database and make sure the table exists
    pub async fn connect(config: SqliteStoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| format!("Bad database URL: {}", config.database_url))?
            .create_if_missing(true);

        // An in-memory database lives only as long as its connection
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", config.database_url))?;

        Self::from_pool(pool, &config.table, config.rules).await
    }

    pub async fn from_pool(pool: SqlitePool, table: &str, rules: SanitizeRules) -> Result<Self> {
        if !valid_table_name(table) {
            return Err(StoreError::InvalidTable(table.to_string()).into());
        }
        let store = Self {
            pool,
            table: table.to_string(),
            rules,
        };
        store.ensure_table().await?;
        Ok(store)
    }

    /// Create the records table if it is absent
    pub async fn ensure_table(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id TEXT PRIMARY KEY NOT NULL,
                business_key TEXT NOT NULL,
                payload TEXT NOT NULL,
                record_date TEXT,
                synced_at TEXT NOT NULL
            )",
            t = self.table
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create table {}", self.table))?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_business_key ON {t} (business_key)",
            t = self.table
        );
        sqlx::query(&index).execute(&self.pool).await?;

        info!(table = %self.table, "Store table ready");
        Ok(())
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Record>> {
        let payload: Option<String> =
            sqlx::query_scalar(&format!("SELECT payload FROM {} WHERE id = ?", self.table))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        payload
            .map(|p| {
                let value = serde_json::from_str(&p)
                    .with_context(|| format!("Bad stored payload for {}", id))?;
                Record::from_value(value).ok_or_else(|| {
                    StoreError::CorruptPayload { id: id.to_string() }.into()
                })
            })
            .transpose()
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert_many(&self, records: &[Record]) -> Result<UpsertCounts> {
        let sql = format!(
            "INSERT INTO {t} (id, business_key, payload, record_date, synced_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                business_key = excluded.business_key,
                payload = excluded.payload,
                record_date = excluded.record_date,
                synced_at = excluded.synced_at",
            t = self.table
        );
        let synced_at = timestamp(Utc::now());
        let mut counts = UpsertCounts::default();

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        for record in records {
            let (Some(id), Some(business_key)) = (
                record.key(&self.rules.id_field),
                record.key(&self.rules.business_key_field),
            ) else {
                counts.failed += 1;
                continue;
            };
            let payload = serde_json::to_string(record)?;

            sqlx::query(&sql)
                .bind(&id)
                .bind(&business_key)
                .bind(&payload)
                .bind(self.rules.record_date(record).map(timestamp))
                .bind(&synced_at)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to upsert record {}", id))?;
            counts.written += 1;
        }
        tx.commit().await.context("Failed to commit batch")?;

        debug!(
            table = %self.table,
            written = counts.written,
            failed = counts.failed,
            "Upserted batch"
        );
        Ok(counts)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE COALESCE(record_date, synced_at) < ?",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(timestamp(cutoff))
            .execute(&self.pool)
            .await
            .context("Failed to delete old records")?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Store health check failed")?;
        Ok(())
    }
}
