//! Observability infrastructure for order sync
//!
//! Provides:
//! - Prometheus metrics (run outcomes, record throughput, classified errors, run duration)
//! - Structured JSON logging with tracing

use crate::sync::SyncRun;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for run durations (in seconds)
const RUN_DURATION_BUCKETS: &[f64] = &[
    0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SyncMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct SyncMetricsInner {
    runs_total: IntCounterVec,
    run_in_progress: IntGauge,
    run_duration_seconds: Histogram,
    records_fetched: IntCounter,
    records_written: IntCounter,
    records_failed: IntCounter,
    pages_failed: IntCounter,
    errors_classified: IntCounterVec,
    retries_total: IntCounterVec,
    cleanup_deleted: IntCounter,
}

impl SyncMetricsInner {
    fn new() -> Self {
        Self {
            runs_total: register_int_counter_vec!(
                "order_sync_runs_total",
                "Sync runs by mode and terminal status",
                &["mode", "status"]
            )
            .expect("Failed to register runs_total"),

            run_in_progress: register_int_gauge!(
                "order_sync_run_in_progress",
                "1 while a sync run is executing"
            )
            .expect("Failed to register run_in_progress"),

            run_duration_seconds: register_histogram!(
                "order_sync_run_duration_seconds",
                "Wall-clock duration of sync runs",
                RUN_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register run_duration_seconds"),

            records_fetched: register_int_counter!(
                "order_sync_records_fetched_total",
                "Records fetched from the source API"
            )
            .expect("Failed to register records_fetched"),

            records_written: register_int_counter!(
                "order_sync_records_written_total",
                "Records upserted into the store"
            )
            .expect("Failed to register records_written"),

            records_failed: register_int_counter!(
                "order_sync_records_failed_total",
                "Records rejected by sanitization or lost to failed batches"
            )
            .expect("Failed to register records_failed"),

            pages_failed: register_int_counter!(
                "order_sync_pages_failed_total",
                "Pages skipped after exhausting retries"
            )
            .expect("Failed to register pages_failed"),

            errors_classified: register_int_counter_vec!(
                "order_sync_errors_classified_total",
                "Classified errors by kind and category",
                &["kind", "category"]
            )
            .expect("Failed to register errors_classified"),

            retries_total: register_int_counter_vec!(
                "order_sync_retries_total",
                "Retry strategies executed by error kind",
                &["kind"]
            )
            .expect("Failed to register retries_total"),

            cleanup_deleted: register_int_counter!(
                "order_sync_cleanup_deleted_total",
                "Records removed by retention cleanup"
            )
            .expect("Failed to register cleanup_deleted"),
        }
    }
}

/// Sync metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SyncMetrics {
    _private: (),
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SyncMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SyncMetricsInner {
        GLOBAL_METRICS.get_or_init(SyncMetricsInner::new)
    }

    pub fn set_run_in_progress(&self, running: bool) {
        self.inner().run_in_progress.set(i64::from(running));
    }

    /// Record a finished run
    pub fn observe_run(&self, mode: &str, status: &str, duration_secs: f64) {
        self.inner()
            .runs_total
            .with_label_values(&[mode, status])
            .inc();
        self.inner().run_duration_seconds.observe(duration_secs);
    }

    pub fn add_records_fetched(&self, count: u64) {
        self.inner().records_fetched.inc_by(count);
    }

    pub fn add_records_written(&self, count: u64) {
        self.inner().records_written.inc_by(count);
    }

    pub fn add_records_failed(&self, count: u64) {
        self.inner().records_failed.inc_by(count);
    }

    pub fn inc_pages_failed(&self) {
        self.inner().pages_failed.inc();
    }

    pub fn inc_errors_classified(&self, kind: &str, category: &str) {
        self.inner()
            .errors_classified
            .with_label_values(&[kind, category])
            .inc();
    }

    pub fn inc_retries(&self, kind: &str) {
        self.inner().retries_total.with_label_values(&[kind]).inc();
    }

    pub fn add_cleanup_deleted(&self, count: u64) {
        self.inner().cleanup_deleted.inc_by(count);
    }
}

/// Structured logger for sync events
///
/// Provides consistent event-tagged logging for run lifecycle,
/// scheduling and maintenance operations.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_sync_started(&self, run: &SyncRun) {
        info!(
            event = "sync_started",
            instance = %self.instance,
            run_id = %run.id,
            mode = %run.mode,
            filters = ?run.filters,
            "Sync run started"
        );
    }

    pub fn log_sync_finished(&self, run: &SyncRun, duration_ms: u64) {
        if run.status.is_success() {
            info!(
                event = "sync_finished",
                instance = %self.instance,
                run_id = %run.id,
                mode = %run.mode,
                status = %run.status,
                pages = run.pages_fetched,
                fetched = run.records_fetched,
                written = run.records_written,
                failed = run.records_failed,
                failed_pages = run.failed_pages,
                duration_ms = duration_ms,
                "Sync run succeeded"
            );
        } else {
            warn!(
                event = "sync_finished",
                instance = %self.instance,
                run_id = %run.id,
                mode = %run.mode,
                status = %run.status,
                fetched = run.records_fetched,
                written = run.records_written,
                failed = run.records_failed,
                last_error = ?run.last_error,
                duration_ms = duration_ms,
                "Sync run failed"
            );
        }
    }

    pub fn log_record_rejected(&self, run_id: &str, record_id: Option<&str>, reason: &str) {
        warn!(
            event = "record_rejected",
            instance = %self.instance,
            run_id = %run_id,
            record_id = ?record_id,
            reason = %reason,
            "Record rejected by sanitization"
        );
    }

    pub fn log_cleanup(&self, deleted: u64, days_to_keep: u32) {
        info!(
            event = "cleanup_completed",
            instance = %self.instance,
            deleted = deleted,
            days_to_keep = days_to_keep,
            "Old records cleaned up"
        );
    }

    pub fn log_schedule_change(&self, active: bool, cadence: Option<&str>) {
        info!(
            event = "schedule_changed",
            instance = %self.instance,
            active = active,
            cadence = ?cadence,
            "Sync schedule updated"
        );
    }

    /// Log daemon startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "daemon_started",
            instance = %self.instance,
            version = %version,
            "Order sync daemon started"
        );
    }

    /// Log daemon shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "daemon_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Order sync daemon shutting down"
        );
    }
}
