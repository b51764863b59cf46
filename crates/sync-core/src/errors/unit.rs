//! Retry loop for a single unit of work (one page fetch, one batch write)

use super::categorizer::ErrorCategorizer;
use super::classification::ErrorClassification;
use super::strategy::RetryContext;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// A unit of work that failed and will not be retried again
#[derive(Debug, Clone, Error)]
#[error("{operation} failed after {attempts} attempt(s): {message}")]
pub struct UnitFailure {
    pub operation: String,
    pub classification: ErrorClassification,
    pub message: String,
    pub attempts: u32,
}

impl UnitFailure {
    pub fn is_permanent(&self) -> bool {
        self.classification.is_permanent()
    }
}

/// Run `op` until it succeeds or the categorizer refuses another attempt.
///
/// Every attempt is bounded by `timeout`; an elapsed timeout is reported as
/// a timed-out error so it classifies as a network failure. The same unit is
/// re-run on retry, never skipped.
pub async fn with_retry<T, F, Fut>(
    categorizer: &ErrorCategorizer,
    ctx: &RetryContext,
    timeout: Duration,
    operation: &str,
    context: BTreeMap<String, String>,
    mut op: F,
) -> Result<T, UnitFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut retries = 0u32;
    loop {
        let err = match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => anyhow::anyhow!("{} timed out after {:?}", operation, timeout),
        };

        let mut error_context = context.clone();
        error_context.insert("operation".to_string(), operation.to_string());
        error_context.insert("attempt".to_string(), (retries + 1).to_string());
        let classification = categorizer.classify(&err, error_context);

        if !categorizer.should_retry(&classification, retries) {
            return Err(UnitFailure {
                operation: operation.to_string(),
                message: format!("{:#}", err),
                classification,
                attempts: retries + 1,
            });
        }

        retries += 1;
        warn!(
            operation = operation,
            kind = %classification.kind,
            retry = retries,
            max_retries = classification.max_retries,
            "Retrying after failure"
        );
        categorizer
            .execute_retry_strategy(&classification, retries, ctx)
            .await;
    }
}
