//! Sync orchestration
//!
//! This module provides:
//! - The orchestrator that runs fetch, sanitize and write for one sync
//! - Run records, aggregate statistics and status snapshots

mod orchestrator;
mod run;

#[cfg(test)]
mod tests;

pub use orchestrator::{SyncOrchestrator, SyncOrchestratorBuilder};
pub use run::{
    CleanupReport, ConnectionCheck, ConnectionReport, DetailedStats, Rejection, RunStatus,
    SyncMode, SyncRun, SyncStats, SyncStatus, MAX_REJECTIONS, RECENT_RUNS_LIMIT,
};
