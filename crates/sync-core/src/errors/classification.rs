//! Classification types produced by the error categorizer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Whether an error class may ever succeed on retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Transient,
    Permanent,
    Mixed,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Mixed => "mixed",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Network,
    Authentication,
    RateLimit,
    Server,
    Resource,
    Validation,
    Permission,
    Filesystem,
    Integration,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rateLimit",
            ErrorKind::Server => "server",
            ErrorKind::Resource => "resource",
            ErrorKind::Validation => "validation",
            ErrorKind::Permission => "permission",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::Integration => "integration",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recovery action taken between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RetryStrategy {
    ExponentialBackoff,
    TokenRefresh,
    MemoryCleanup,
    FilesystemCheck,
    ApiRefresh,
    NoRetry,
}

impl RetryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStrategy::ExponentialBackoff => "exponential_backoff",
            RetryStrategy::TokenRefresh => "token_refresh",
            RetryStrategy::MemoryCleanup => "memory_cleanup",
            RetryStrategy::FilesystemCheck => "filesystem_check",
            RetryStrategy::ApiRefresh => "api_refresh",
            RetryStrategy::NoRetry => "no_retry",
        }
    }

    /// Resolve a strategy tag; unrecognized tags back off exponentially
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "token_refresh" => RetryStrategy::TokenRefresh,
            "memory_cleanup" => RetryStrategy::MemoryCleanup,
            "filesystem_check" => RetryStrategy::FilesystemCheck,
            "api_refresh" => RetryStrategy::ApiRefresh,
            "no_retry" => RetryStrategy::NoRetry,
            _ => RetryStrategy::ExponentialBackoff,
        }
    }
}

impl From<String> for RetryStrategy {
    fn from(tag: String) -> Self {
        RetryStrategy::from_tag(&tag)
    }
}

impl From<RetryStrategy> for String {
    fn from(strategy: RetryStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy attached to a kind of error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationTemplate {
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retry_strategy: RetryStrategy,
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

/// The verdict for one observed failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retry_strategy: RetryStrategy,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Rendered error chain of the original failure
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl ErrorClassification {
    /// Build a classification from a template.
    ///
    /// Permanent classifications always carry a zero retry budget.
    pub fn from_template(
        template: &ClassificationTemplate,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
        context: BTreeMap<String, String>,
    ) -> Self {
        let max_retries = match template.category {
            ErrorCategory::Permanent => 0,
            _ => template.max_retries,
        };
        Self {
            kind: template.kind,
            category: template.category,
            severity: template.severity,
            retry_strategy: template.retry_strategy,
            max_retries,
            base_delay_ms: template.base_delay_ms,
            message: message.into(),
            timestamp,
            context,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.category == ErrorCategory::Permanent
    }
}
