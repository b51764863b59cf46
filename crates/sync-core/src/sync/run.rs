//! Sync run records and aggregate statistics

use crate::config::SyncConfig;
use crate::errors::{ErrorClassification, ErrorStatistics, Recommendation};
use crate::models::SyncFilters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rejections kept per run; the count in `records_failed` is not capped
pub const MAX_REJECTIONS: usize = 50;

/// Finished runs kept for detailed stats
pub const RECENT_RUNS_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Incremental run started by the scheduler
    Scheduled,
    /// Incremental run started by an operator
    Manual,
    /// Walks every page regardless of the last successful run
    Full,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Scheduled => "scheduled",
            SyncMode::Manual => "manual",
            SyncMode::Full => "full",
        }
    }

    pub fn is_incremental(&self) -> bool {
        !matches!(self, SyncMode::Full)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record dropped before reaching the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub reason: String,
}

/// One sync run, owned and mutated only by the orchestrator executing it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub mode: SyncMode,
    /// Filters actually sent to the source
    pub filters: SyncFilters,
    pub pages_fetched: u64,
    pub records_fetched: u64,
    pub records_written: u64,
    pub records_failed: u64,
    pub failed_pages: u64,
    pub rejections: Vec<Rejection>,
    pub permanent_failures: u64,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorClassification>,
}

impl SyncRun {
    pub fn start(mode: SyncMode, filters: SyncFilters) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            mode,
            filters,
            pages_fetched: 0,
            records_fetched: 0,
            records_written: 0,
            records_failed: 0,
            failed_pages: 0,
            rejections: Vec::new(),
            permanent_failures: 0,
            status: RunStatus::Running,
            last_error: None,
            error: None,
        }
    }

    pub fn reject(&mut self, record_id: Option<String>, reason: String) {
        self.records_failed += 1;
        if self.rejections.len() < MAX_REJECTIONS {
            self.rejections.push(Rejection { record_id, reason });
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

/// Process-lifetime aggregate over finished runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub total_records_processed: u64,
    pub last_sync_duration_ms: u64,
    pub average_sync_duration_ms: u64,
}

impl SyncStats {
    /// Fold a finished run into the totals
    pub fn record(&mut self, run: &SyncRun, duration_ms: u64) {
        self.total_syncs += 1;
        if run.status.is_success() {
            self.successful_syncs += 1;
            self.total_records_processed += run.records_written;
        } else {
            self.failed_syncs += 1;
        }

        self.last_sync_duration_ms = duration_ms;
        let previous = self.average_sync_duration_ms as u128 * (self.total_syncs as u128 - 1);
        self.average_sync_duration_ms =
            ((previous + duration_ms as u128) / self.total_syncs as u128) as u64;
    }
}

/// Point-in-time view of the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_running: bool,
    /// Start of the most recent successful run
    pub last_sync_time: Option<DateTime<Utc>>,
    pub current_run: Option<SyncRun>,
    pub last_run: Option<SyncRun>,
    pub config: SyncConfig,
    pub sync_stats: SyncStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedStats {
    #[serde(flatten)]
    pub status: SyncStatus,
    pub error_statistics: ErrorStatistics,
    pub recommendations: Vec<Recommendation>,
    /// Newest first
    pub recent_runs: Vec<SyncRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted_count: u64,
    pub days_to_keep: u32,
    pub cutoff: DateTime<Utc>,
}

/// Reachability of one collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorClassification>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub source: ConnectionCheck,
    pub store: ConnectionCheck,
}

impl ConnectionReport {
    pub fn all_ok(&self) -> bool {
        self.source.ok && self.store.ok
    }
}
