//! Retry strategy execution
//!
//! Each `RetryStrategy` maps to one recovery routine. Caller-supplied
//! recovery actions (token refresh, cache cleanup, API client refresh) are
//! injected through `RetryContext` instead of being looked up globally.

use super::classification::{ErrorClassification, RetryStrategy};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ceiling for a single exponential backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// Upper bound (exclusive) of the random jitter added to each backoff
pub const MAX_JITTER_MS: u64 = 1000;

/// A recovery action run between attempts
#[async_trait]
pub trait RecoveryHook: Send + Sync {
    async fn run(&self) -> Result<()>;
}

/// Capabilities available to retry strategies
#[derive(Clone)]
pub struct RetryContext {
    pub refresh_token: Option<Arc<dyn RecoveryHook>>,
    pub cleanup: Option<Arc<dyn RecoveryHook>>,
    pub refresh_api: Option<Arc<dyn RecoveryHook>>,
    /// Directory probed by the filesystem check
    pub scratch_dir: PathBuf,
}

impl Default for RetryContext {
    fn default() -> Self {
        Self {
            refresh_token: None,
            cleanup: None,
            refresh_api: None,
            scratch_dir: std::env::temp_dir(),
        }
    }
}

impl std::fmt::Debug for RetryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryContext")
            .field("refresh_token", &self.refresh_token.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .field("refresh_api", &self.refresh_api.is_some())
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

impl RetryContext {
    pub fn with_refresh_token(mut self, hook: Arc<dyn RecoveryHook>) -> Self {
        self.refresh_token = Some(hook);
        self
    }

    pub fn with_cleanup(mut self, hook: Arc<dyn RecoveryHook>) -> Self {
        self.cleanup = Some(hook);
        self
    }

    pub fn with_refresh_api(mut self, hook: Arc<dyn RecoveryHook>) -> Self {
        self.refresh_api = Some(hook);
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }
}

/// Exponential delay for a 1-based attempt number, jitter included, capped
pub fn backoff_delay(base_delay_ms: u64, attempt: u32, jitter_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let delay = base_delay_ms
        .saturating_mul(1u64 << exponent)
        .saturating_add(jitter_ms);
    Duration::from_millis(delay).min(MAX_BACKOFF)
}

/// Generate a random jitter value between 0 and max_ms
pub(crate) fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

/// Run the recovery routine selected by the classification.
///
/// Returns the total time spent sleeping.
pub async fn execute(
    classification: &ErrorClassification,
    attempt: u32,
    ctx: &RetryContext,
) -> Duration {
    match classification.retry_strategy {
        RetryStrategy::ExponentialBackoff => exponential_backoff(classification, attempt).await,
        RetryStrategy::TokenRefresh => {
            let pause = Duration::from_millis(classification.base_delay_ms);
            tokio::time::sleep(pause).await;
            match run_hook("refresh_token", ctx.refresh_token.as_deref()).await {
                true => pause,
                false => pause + exponential_backoff(classification, attempt).await,
            }
        }
        RetryStrategy::MemoryCleanup => {
            // No collector to poke; release what the caller can release
            run_hook("cleanup", ctx.cleanup.as_deref()).await;
            let pause = Duration::from_millis(
                classification
                    .base_delay_ms
                    .saturating_mul(u64::from(attempt) + 1),
            );
            tokio::time::sleep(pause).await;
            pause
        }
        RetryStrategy::FilesystemCheck => {
            match probe_scratch_dir(&ctx.scratch_dir).await {
                Ok(()) => info!(dir = %ctx.scratch_dir.display(), "Filesystem probe succeeded"),
                Err(e) => warn!(
                    dir = %ctx.scratch_dir.display(),
                    error = %format!("{:#}", e),
                    "Filesystem probe failed"
                ),
            }
            exponential_backoff(classification, attempt).await
        }
        RetryStrategy::ApiRefresh => {
            run_hook("refresh_api", ctx.refresh_api.as_deref()).await;
            exponential_backoff(classification, attempt).await
        }
        RetryStrategy::NoRetry => Duration::ZERO,
    }
}

async fn exponential_backoff(classification: &ErrorClassification, attempt: u32) -> Duration {
    let delay = backoff_delay(
        classification.base_delay_ms,
        attempt,
        rand_jitter(MAX_JITTER_MS),
    );
    debug!(
        kind = %classification.kind,
        attempt = attempt,
        delay_ms = delay.as_millis() as u64,
        "Backing off before retry"
    );
    tokio::time::sleep(delay).await;
    delay
}

/// Returns true only when a hook was present and succeeded
async fn run_hook(name: &str, hook: Option<&dyn RecoveryHook>) -> bool {
    let Some(hook) = hook else {
        debug!(hook = name, "No recovery hook configured");
        return false;
    };
    match hook.run().await {
        Ok(()) => {
            info!(hook = name, "Recovery hook succeeded");
            true
        }
        Err(e) => {
            warn!(hook = name, error = %format!("{:#}", e), "Recovery hook failed");
            false
        }
    }
}

async fn probe_scratch_dir(dir: &std::path::Path) -> Result<()> {
    let probe = dir.join(format!(".ordersync-probe-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&probe, b"probe")
        .await
        .with_context(|| format!("Failed to write probe file {:?}", probe))?;
    tokio::fs::remove_file(&probe)
        .await
        .with_context(|| format!("Failed to delete probe file {:?}", probe))?;
    Ok(())
}
