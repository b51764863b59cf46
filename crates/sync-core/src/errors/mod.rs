//! Error categorization and retry policy
//!
//! This module provides:
//! - An ordered rule table mapping failures to kinds and retry policies
//! - A bounded classification history with an error-storm breaker
//! - Retry strategy execution with injectable recovery hooks
//! - A per-unit retry loop shared by the fetcher and the writer
//! - Error statistics and operator recommendations

mod categorizer;
mod classification;
mod rules;
mod strategy;
mod unit;

pub use categorizer::{
    CategorizerConfig, ErrorCategorizer, ErrorStatistics, ErrorSummary, Recommendation,
    RecommendationPriority, HISTORY_LIMIT,
};
pub use classification::{
    ClassificationTemplate, ErrorCategory, ErrorClassification, ErrorKind, RetryStrategy,
    Severity,
};
pub use rules::ClassificationRule;
pub use strategy::{backoff_delay, RecoveryHook, RetryContext, MAX_BACKOFF, MAX_JITTER_MS};
pub use unit::{with_retry, UnitFailure};
