//! Sync orchestrator
//!
//! Drives one run at a time: fetch a page, sanitize its records, write
//! them in batches, repeat. A run flag claimed with compare-and-swap keeps
//! runs from overlapping; status readers see snapshots published after
//! every page and never wait on the run itself.

use super::run::{
    CleanupReport, ConnectionCheck, ConnectionReport, DetailedStats, RunStatus, SyncMode,
    SyncRun, SyncStats, SyncStatus, RECENT_RUNS_LIMIT,
};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::errors::{CategorizerConfig, ErrorCategorizer, ErrorClassification, RetryContext};
use crate::health::{Component, ComponentHealth, HealthRegistry};
use crate::models::{SanitizeRules, SyncFilters};
use crate::observability::{StructuredLogger, SyncMetrics};
use crate::source::{FetcherConfig, RecordFetcher, RecordSource};
use crate::store::{BatchWriter, RecordStore, WriterConfig};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct OrchestratorState {
    current: Option<SyncRun>,
    last_run: Option<SyncRun>,
    last_success_started_at: Option<DateTime<Utc>>,
    last_full_sync_at: Option<DateTime<Utc>>,
    stats: SyncStats,
    recent: VecDeque<SyncRun>,
}

/// Releases the run flag however the run ends
struct RunGuard<'a> {
    flag: &'a AtomicBool,
    metrics: &'a SyncMetrics,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.metrics.set_run_in_progress(false);
    }
}

/// Builder for `SyncOrchestrator`
pub struct SyncOrchestratorBuilder {
    config: SyncConfig,
    source: Arc<dyn RecordSource>,
    store: Arc<dyn RecordStore>,
    retry_ctx: RetryContext,
    categorizer: Option<Arc<ErrorCategorizer>>,
    health: Option<HealthRegistry>,
    instance: String,
}

impl SyncOrchestratorBuilder {
    pub fn retry_context(mut self, ctx: RetryContext) -> Self {
        self.retry_ctx = ctx;
        self
    }

    pub fn categorizer(mut self, categorizer: Arc<ErrorCategorizer>) -> Self {
        self.categorizer = Some(categorizer);
        self
    }

    pub fn health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn build(self) -> SyncResult<SyncOrchestrator> {
        self.config.validate()?;

        let categorizer = self
            .categorizer
            .unwrap_or_else(|| Arc::new(ErrorCategorizer::new(CategorizerConfig::from(&self.config))));
        let fetcher = RecordFetcher::new(
            Arc::clone(&self.source),
            Arc::clone(&categorizer),
            self.retry_ctx.clone(),
            FetcherConfig::from(&self.config),
        );
        let writer = BatchWriter::new(
            Arc::clone(&self.store),
            Arc::clone(&categorizer),
            self.retry_ctx,
            WriterConfig::from(&self.config),
        );

        Ok(SyncOrchestrator {
            rules: self.config.sanitize_rules(),
            config: self.config,
            source: self.source,
            store: self.store,
            categorizer,
            fetcher,
            writer,
            running: AtomicBool::new(false),
            state: RwLock::new(OrchestratorState::default()),
            cleanup_lock: Mutex::new(()),
            health: self.health,
            metrics: SyncMetrics::new(),
            logger: StructuredLogger::new(self.instance),
        })
    }
}

pub struct SyncOrchestrator {
    config: SyncConfig,
    rules: SanitizeRules,
    source: Arc<dyn RecordSource>,
    store: Arc<dyn RecordStore>,
    categorizer: Arc<ErrorCategorizer>,
    fetcher: RecordFetcher,
    writer: BatchWriter,
    running: AtomicBool,
    state: RwLock<OrchestratorState>,
    cleanup_lock: Mutex<()>,
    health: Option<HealthRegistry>,
    metrics: SyncMetrics,
    logger: StructuredLogger,
}

impl SyncOrchestrator {
    pub fn builder(
        config: SyncConfig,
        source: Arc<dyn RecordSource>,
        store: Arc<dyn RecordStore>,
    ) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder {
            config,
            source,
            store,
            retry_ctx: RetryContext::default(),
            categorizer: None,
            health: None,
            instance: "ordersync".to_string(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn categorizer(&self) -> &Arc<ErrorCategorizer> {
        &self.categorizer
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn last_full_sync_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_full_sync_at
    }

    /// Run a manual (or full) sync to completion
    pub async fn trigger(&self, full_sync: bool, filters: SyncFilters) -> SyncResult<SyncRun> {
        let mode = if full_sync {
            SyncMode::Full
        } else {
            SyncMode::Manual
        };
        self.trigger_sync(mode, filters).await
    }

    /// Run one sync to completion.
    ///
    /// Returns the finished run whether it succeeded or failed; the only
    /// error is `AlreadyRunning` when another run holds the flag.
    pub async fn trigger_sync(&self, mode: SyncMode, filters: SyncFilters) -> SyncResult<SyncRun> {
        let (mut run, _guard) = {
            let mut state = self.state.write().await;
            if self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                let run_id = state
                    .current
                    .as_ref()
                    .map(|r| r.id.clone())
                    .unwrap_or_default();
                info!(run_id = %run_id, mode = %mode, "Sync already in progress, not starting");
                return Err(SyncError::AlreadyRunning { run_id });
            }
            let guard = RunGuard {
                flag: &self.running,
                metrics: &self.metrics,
            };

            let mut filters = filters;
            if mode.is_incremental() && filters.updated_after.is_none() {
                filters.updated_after = state.last_success_started_at;
            }
            let run = SyncRun::start(mode, filters);
            state.current = Some(run.clone());
            (run, guard)
        };

        self.metrics.set_run_in_progress(true);
        self.categorizer.begin_run();
        self.logger.log_sync_started(&run);
        let started = Instant::now();

        if let Err(err) = self.execute(&mut run).await {
            run.status = RunStatus::Failed;
            if let SyncError::Classified { classification } = &err {
                run.error = Some(classification.as_ref().clone());
            }
            run.last_error = Some(err.to_string());
        } else {
            run.status = RunStatus::Succeeded;
        }
        run.finished_at = Some(Utc::now());

        let duration_ms = started.elapsed().as_millis() as u64;
        self.finish(&run, duration_ms).await;
        Ok(run)
    }

    async fn execute(&self, run: &mut SyncRun) -> SyncResult<()> {
        let max_page_failures = self.config.max_consecutive_page_failures.max(1);
        let mut cursor = self
            .fetcher
            .pages(run.filters.clone(), self.config.max_records_per_run);
        let mut consecutive_failures = 0u32;

        loop {
            match cursor.next_page().await {
                Ok(None) => return Ok(()),
                Ok(Some(page)) => {
                    consecutive_failures = 0;
                    run.pages_fetched += 1;
                    run.records_fetched += page.records.len() as u64;
                    self.metrics.add_records_fetched(page.records.len() as u64);

                    let mut valid = Vec::with_capacity(page.records.len());
                    for record in page.records {
                        let record_id = record.key(&self.rules.id_field);
                        match self.rules.sanitize(record) {
                            Ok(clean) => valid.push(clean),
                            Err(reason) => {
                                let reason = reason.to_string();
                                self.logger
                                    .log_record_rejected(&run.id, record_id.as_deref(), &reason);
                                self.metrics.add_records_failed(1);
                                run.reject(record_id, reason);
                            }
                        }
                    }

                    let outcome = self.writer.upsert_batch(&valid).await;
                    run.records_written += outcome.written;
                    run.records_failed += outcome.failed;
                    self.metrics.add_records_written(outcome.written);
                    self.metrics.add_records_failed(outcome.failed);

                    if let Some(fatal) = outcome.fatal {
                        run.permanent_failures += 1;
                        return Err(SyncError::classified(fatal));
                    }
                }
                Err(failure) => {
                    run.failed_pages += 1;
                    self.metrics.inc_pages_failed();
                    if failure.is_permanent() {
                        run.permanent_failures += 1;
                        return Err(SyncError::classified(failure.classification));
                    }

                    consecutive_failures += 1;
                    if consecutive_failures >= max_page_failures {
                        run.error = Some(failure.classification.clone());
                        return Err(SyncError::Other(anyhow::anyhow!(
                            "{} consecutive pages failed, last: {}",
                            consecutive_failures,
                            failure
                        )));
                    }
                    warn!(
                        run_id = %run.id,
                        page = cursor.position(),
                        error = %failure,
                        "Page failed after retries, continuing"
                    );
                    cursor.skip_failed_page();
                }
            }

            self.state.write().await.current = Some(run.clone());
        }
    }

    async fn finish(&self, run: &SyncRun, duration_ms: u64) {
        {
            let mut state = self.state.write().await;
            state.stats.record(run, duration_ms);
            if run.status.is_success() {
                state.last_success_started_at = Some(run.started_at);
                if run.mode == SyncMode::Full {
                    state.last_full_sync_at = Some(run.started_at);
                }
            }
            state.current = None;
            state.last_run = Some(run.clone());
            state.recent.push_front(run.clone());
            state.recent.truncate(RECENT_RUNS_LIMIT);
        }

        self.metrics
            .observe_run(run.mode.as_str(), run.status.as_str(), duration_ms as f64 / 1000.0);
        self.logger.log_sync_finished(run, duration_ms);
        self.report_health(run);
    }

    fn report_health(&self, run: &SyncRun) {
        let Some(health) = &self.health else {
            return;
        };

        match (&run.status, &run.error) {
            (RunStatus::Succeeded, _) => {
                let source = match run.failed_pages {
                    0 => ComponentHealth::healthy(),
                    n => ComponentHealth::degraded(format!("{} page(s) skipped", n)),
                };
                health.update(Component::Source, source.for_run(&run.id));
                health.update(Component::Store, ComponentHealth::healthy().for_run(&run.id));
                health.update(
                    Component::Orchestrator,
                    ComponentHealth::healthy().for_run(&run.id),
                );
            }
            (_, Some(classification)) => {
                let component = match classification.context.get("operation").map(String::as_str) {
                    Some("upsert_batch") => Component::Store,
                    _ => Component::Source,
                };
                health.update(
                    component,
                    ComponentHealth::unhealthy(classification.message.clone()).for_run(&run.id),
                );
                health.update(
                    Component::Orchestrator,
                    ComponentHealth::degraded("last run failed").for_run(&run.id),
                );
            }
            (_, None) => {
                health.update(
                    Component::Orchestrator,
                    ComponentHealth::degraded(run.last_error.clone().unwrap_or_default())
                        .for_run(&run.id),
                );
            }
        }
    }

    pub async fn sync_status(&self) -> SyncStatus {
        let is_running = self.is_running();
        let state = self.state.read().await;
        SyncStatus {
            is_running,
            last_sync_time: state.last_success_started_at,
            current_run: state.current.clone().filter(|_| is_running),
            last_run: state.last_run.clone(),
            config: self.config.clone(),
            sync_stats: state.stats.clone(),
        }
    }

    pub async fn detailed_stats(&self) -> DetailedStats {
        let status = self.sync_status().await;
        let recent_runs = self.state.read().await.recent.iter().cloned().collect();
        DetailedStats {
            status,
            error_statistics: self.categorizer.error_statistics(),
            recommendations: self.categorizer.recommendations(),
            recent_runs,
        }
    }

    /// Delete records older than `days_to_keep` days.
    ///
    /// Only one cleanup runs at a time; it does not interact with sync runs.
    pub async fn cleanup_old_records(&self, days_to_keep: u32) -> SyncResult<CleanupReport> {
        if days_to_keep < 1 {
            return Err(SyncError::InvalidRetention(days_to_keep));
        }
        let _guard = self
            .cleanup_lock
            .try_lock()
            .map_err(|_| SyncError::CleanupInProgress)?;

        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days_to_keep));
        let deleted_count = self
            .bounded("delete_older_than", self.store.delete_older_than(cutoff))
            .await
            .map_err(SyncError::classified)?;

        self.metrics.add_cleanup_deleted(deleted_count);
        self.logger.log_cleanup(deleted_count, days_to_keep);
        Ok(CleanupReport {
            deleted_count,
            days_to_keep,
            cutoff,
        })
    }

    /// Probe source and store reachability without syncing
    pub async fn test_connections(&self) -> ConnectionReport {
        let (source, store) = tokio::join!(
            self.check("source", self.source.health_check()),
            self.check("store", self.store.health_check()),
        );

        if let Some(health) = &self.health {
            for (component, check) in [(Component::Source, &source), (Component::Store, &store)] {
                match &check.error {
                    None => health.set_healthy(component),
                    Some(c) => health.set_unhealthy(component, c.message.clone()),
                }
            }
        }

        ConnectionReport { source, store }
    }

    async fn check<F>(&self, component: &str, probe: F) -> ConnectionCheck
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        let started = Instant::now();
        let result = self.bounded("health_check", probe).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => ConnectionCheck {
                ok: true,
                latency_ms,
                error: None,
            },
            Err(mut classification) => {
                classification
                    .context
                    .insert("component".to_string(), component.to_string());
                ConnectionCheck {
                    ok: false,
                    latency_ms,
                    error: Some(classification),
                }
            }
        }
    }

    /// Run a single collaborator call under the request timeout, classifying failure
    async fn bounded<T, F>(&self, operation: &str, call: F) -> Result<T, ErrorClassification>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let err = match tokio::time::timeout(self.config.request_timeout(), call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => anyhow::anyhow!(
                "{} timed out after {:?}",
                operation,
                self.config.request_timeout()
            ),
        };
        let context = BTreeMap::from([("operation".to_string(), operation.to_string())]);
        Err(self.categorizer.classify(&err, context))
    }
}
