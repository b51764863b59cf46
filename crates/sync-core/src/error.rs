//! Error types surfaced by the sync core

use crate::config::ConfigError;
use crate::errors::ErrorClassification;
use thiserror::Error;

/// Errors returned by the orchestrator's public operations
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync is already in progress (run {run_id})")]
    AlreadyRunning { run_id: String },

    #[error("a cleanup is already in progress")]
    CleanupInProgress,

    #[error("days_to_keep must be at least 1, got {0}")]
    InvalidRetention(u32),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{} error: {}", .classification.kind, .classification.message)]
    Classified {
        classification: Box<ErrorClassification>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    pub fn classified(classification: ErrorClassification) -> Self {
        SyncError::Classified {
            classification: Box::new(classification),
        }
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self, SyncError::AlreadyRunning { .. })
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
