//! Error categorizer
//!
//! Classifies failures against the ordered rule table, keeps a bounded
//! history of classifications, decides whether a retry is allowed and
//! derives diagnostics from the history.

use super::classification::{
    ClassificationTemplate, ErrorCategory, ErrorClassification, ErrorKind, Severity,
};
use super::rules::{default_rules, unknown_template, ClassificationRule};
use super::strategy::{self, RetryContext};
use crate::config::{BreakerScope, SyncConfig};
use crate::observability::SyncMetrics;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};

/// Classifications kept for diagnostics and the storm breaker
pub const HISTORY_LIMIT: usize = 100;

/// Last-hour error count above which a critical advisory is raised
const HIGH_ERROR_RATE_THRESHOLD: usize = 10;

/// Tuning for the categorizer
#[derive(Debug, Clone)]
pub struct CategorizerConfig {
    pub max_retries_cap: u32,
    pub unknown_base_delay_ms: u64,
    pub storm_threshold: usize,
    pub storm_window: Duration,
    pub breaker_scope: BreakerScope,
    pub history_limit: usize,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for CategorizerConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_retries_cap: config.max_retries,
            unknown_base_delay_ms: config.base_retry_delay_ms,
            storm_threshold: config.storm_threshold,
            storm_window: config.storm_window(),
            breaker_scope: config.breaker_scope,
            history_limit: HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Default)]
struct CategorizerState {
    history: VecDeque<ErrorClassification>,
    /// Errors before this instant are ignored by the storm breaker
    breaker_epoch: Option<DateTime<Utc>>,
}

/// Compact view of one historic classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Counts derived from the error history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStatistics {
    /// Entries currently retained in history
    pub total_errors: usize,
    pub last_hour: usize,
    pub last_24_hours: usize,
    /// Per-kind counts over the last 24 hours
    pub by_type: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    /// Most recent classifications, newest first
    pub recent: Vec<ErrorSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    Critical,
    High,
    Medium,
}

/// Operator advisory derived from recent errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: RecommendationPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub message: String,
    pub action: String,
}

/// Classifies failures and decides retry policy
pub struct ErrorCategorizer {
    rules: Vec<ClassificationRule>,
    fallback: ClassificationTemplate,
    config: CategorizerConfig,
    state: Mutex<CategorizerState>,
    metrics: SyncMetrics,
}

impl Default for ErrorCategorizer {
    fn default() -> Self {
        Self::new(CategorizerConfig::default())
    }
}

impl ErrorCategorizer {
    pub fn new(config: CategorizerConfig) -> Self {
        Self {
            rules: default_rules(config.max_retries_cap),
            fallback: unknown_template(config.max_retries_cap, config.unknown_base_delay_ms),
            config,
            state: Mutex::new(CategorizerState::default()),
            metrics: SyncMetrics::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, CategorizerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Classify a failure and append the result to history
    pub fn classify(
        &self,
        err: &anyhow::Error,
        context: BTreeMap<String, String>,
    ) -> ErrorClassification {
        let message = format!("{:#}", err);
        let template = self
            .rules
            .iter()
            .find(|rule| rule.matches(&message))
            .map(|rule| &rule.template)
            .unwrap_or(&self.fallback);

        let classification =
            ErrorClassification::from_template(template, message, Utc::now(), context);
        self.record(classification.clone());
        classification
    }

    /// Append an already-built classification to history
    pub fn record(&self, classification: ErrorClassification) {
        self.metrics
            .inc_errors_classified(classification.kind.as_str(), classification.category.as_str());

        match classification.severity {
            Severity::Critical => error!(
                event = "error_classified",
                kind = %classification.kind,
                category = %classification.category,
                strategy = %classification.retry_strategy,
                message = %classification.message,
                "Critical error classified"
            ),
            _ => warn!(
                event = "error_classified",
                kind = %classification.kind,
                category = %classification.category,
                strategy = %classification.retry_strategy,
                message = %classification.message,
                "Error classified"
            ),
        }

        let mut state = self.state();
        while state.history.len() >= self.config.history_limit {
            state.history.pop_front();
        }
        state.history.push_back(classification);
    }

    /// Decide whether another attempt is allowed after `attempt` retries
    pub fn should_retry(&self, classification: &ErrorClassification, attempt: u32) -> bool {
        if classification.category == ErrorCategory::Permanent {
            return false;
        }
        if attempt >= classification.max_retries {
            return false;
        }

        let recent = self.recent_same_kind(classification.kind, Utc::now());
        if recent > self.config.storm_threshold {
            warn!(
                kind = %classification.kind,
                recent = recent,
                window_secs = self.config.storm_window.as_secs(),
                "Error storm detected, refusing retry"
            );
            return false;
        }

        true
    }

    fn recent_same_kind(&self, kind: ErrorKind, now: DateTime<Utc>) -> usize {
        let window = ChronoDuration::from_std(self.config.storm_window)
            .unwrap_or_else(|_| ChronoDuration::minutes(5));
        let state = self.state();
        let since = match state.breaker_epoch {
            Some(epoch) => epoch.max(now - window),
            None => now - window,
        };
        state
            .history
            .iter()
            .filter(|c| c.kind == kind && c.timestamp >= since)
            .count()
    }

    /// Run the recovery routine for a classification, returning the time waited
    pub async fn execute_retry_strategy(
        &self,
        classification: &ErrorClassification,
        attempt: u32,
        ctx: &RetryContext,
    ) -> Duration {
        self.metrics.inc_retries(classification.kind.as_str());
        strategy::execute(classification, attempt, ctx).await
    }

    /// Mark the start of a sync run
    pub fn begin_run(&self) {
        if self.config.breaker_scope == BreakerScope::PerRun {
            self.state().breaker_epoch = Some(Utc::now());
        }
    }

    /// Drop all history and breaker state
    pub fn clear_history(&self) {
        let mut state = self.state();
        state.history.clear();
        state.breaker_epoch = None;
    }

    pub fn history(&self) -> Vec<ErrorClassification> {
        self.state().history.iter().cloned().collect()
    }

    pub fn error_statistics(&self) -> ErrorStatistics {
        self.error_statistics_at(Utc::now())
    }

    fn error_statistics_at(&self, now: DateTime<Utc>) -> ErrorStatistics {
        let hour_ago = now - ChronoDuration::hours(1);
        let day_ago = now - ChronoDuration::hours(24);
        let state = self.state();

        let mut stats = ErrorStatistics {
            total_errors: state.history.len(),
            ..Default::default()
        };

        for c in state.history.iter().filter(|c| c.timestamp >= day_ago) {
            stats.last_24_hours += 1;
            if c.timestamp >= hour_ago {
                stats.last_hour += 1;
            }
            *stats.by_type.entry(c.kind.as_str().to_string()).or_default() += 1;
            *stats
                .by_category
                .entry(c.category.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_severity
                .entry(c.severity.as_str().to_string())
                .or_default() += 1;
        }

        stats.recent = state
            .history
            .iter()
            .rev()
            .take(10)
            .map(|c| ErrorSummary {
                kind: c.kind,
                category: c.category,
                severity: c.severity,
                message: c.message.clone(),
                timestamp: c.timestamp,
            })
            .collect();

        stats
    }

    pub fn recommendations(&self) -> Vec<Recommendation> {
        let stats = self.error_statistics();
        let mut out = Vec::new();

        if stats.last_hour > HIGH_ERROR_RATE_THRESHOLD {
            out.push(Recommendation {
                priority: RecommendationPriority::Critical,
                kind: None,
                message: format!("High error rate: {} errors in the last hour", stats.last_hour),
                action: "Check source API and database health before the next scheduled sync"
                    .to_string(),
            });
        }

        if stats.last_24_hours > 0 {
            let dominant = stats
                .by_type
                .iter()
                .max_by_key(|(_, count)| **count)
                .filter(|(_, count)| **count * 2 > stats.last_24_hours);
            if let Some((tag, count)) = dominant {
                let kind = self
                    .state()
                    .history
                    .iter()
                    .find(|c| c.kind.as_str() == tag)
                    .map(|c| c.kind);
                if let Some(kind) = kind {
                    out.push(Recommendation {
                        priority: RecommendationPriority::High,
                        kind: Some(kind),
                        message: format!(
                            "{} errors account for {} of {} errors in the last 24 hours",
                            kind, count, stats.last_24_hours
                        ),
                        action: remediation(kind).to_string(),
                    });
                }
            }
        }

        let permanent = stats
            .by_category
            .get(ErrorCategory::Permanent.as_str())
            .copied()
            .unwrap_or(0);
        if permanent > 0 {
            out.push(Recommendation {
                priority: RecommendationPriority::Medium,
                kind: None,
                message: format!("{} permanent errors in the last 24 hours", permanent),
                action: "Permanent errors are never retried; fix the offending records or \
                         credentials and re-run a full sync"
                    .to_string(),
            });
        }

        if !out.is_empty() {
            info!(count = out.len(), "Generated error recommendations");
        }
        out
    }
}

fn remediation(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Network => "Check connectivity to the source API and consider raising request_timeout_secs",
        ErrorKind::Authentication => "Verify the API token and its expiry; rotate credentials if needed",
        ErrorKind::RateLimit => "Reduce page_size or lengthen the sync interval to stay under the API quota",
        ErrorKind::Server => "The source API is failing; check its status page and retry later",
        ErrorKind::Resource => "Lower batch_size and page_size to reduce memory pressure",
        ErrorKind::Validation => "Inspect rejected records for malformed fields and fix them at the source",
        ErrorKind::Permission => "Grant the sync account read access to orders and write access to the store",
        ErrorKind::Filesystem => "Check free disk space and permissions on the database directory",
        ErrorKind::Integration => "The API response shape changed; verify the envelope field and API version",
        ErrorKind::Unknown => "Review recent logs for the unclassified error messages",
    }
}
