//! Order sync core library
//!
//! This crate provides the core functionality for:
//! - Fetching paged order records from a remote API
//! - Sanitizing and upserting them into a local store
//! - Classifying failures and deciding retries
//! - Single-flight run orchestration and scheduling
//! - Health checks and observability

pub mod config;
pub mod error;
pub mod errors;
pub mod health;
pub mod models;
pub mod observability;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::{parse_schedule, BreakerScope, Cadence, ConfigError, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use errors::{
    ErrorCategorizer, ErrorCategory, ErrorClassification, ErrorKind, RetryContext, RetryStrategy,
    Severity,
};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, SyncMetrics};
pub use scheduler::{ScheduleStatus, SyncScheduler};
pub use source::{HttpRecordSource, HttpSourceConfig, RecordSource};
pub use store::{RecordStore, SqliteRecordStore, SqliteStoreConfig};
pub use sync::{SyncMode, SyncOrchestrator, SyncRun, SyncStatus};
