//! Integration tests for sync module
//!
//! These tests verify:
//! - Run lifecycle, counters and stats
//! - Single-flight triggering
//! - Partial-failure tolerance and fail-fast on permanent errors
//! - Cleanup and connection checks

use super::*;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::errors::ErrorKind;
use crate::health::{Component, ComponentStatus, HealthRegistry};
use crate::models::{Record, SyncFilters};
use crate::store::{SqliteRecordStore, SqliteStoreConfig};
use crate::testing::{order, orders, Fault, MemoryStore, MockSource};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

fn small_pages() -> SyncConfig {
    SyncConfig {
        page_size: 10,
        batch_size: 4,
        ..Default::default()
    }
}

fn orchestrator(
    config: SyncConfig,
    source: Arc<MockSource>,
    store: Arc<MemoryStore>,
) -> Arc<SyncOrchestrator> {
    Arc::new(SyncOrchestrator::builder(config, source, store).build().unwrap())
}

/// Wait until a spawned run has claimed the run flag
async fn wait_until_running(orch: &SyncOrchestrator) {
    for _ in 0..100 {
        if orch.is_running() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("sync never started");
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_sync_writes_every_record() {
        let source = Arc::new(MockSource::new(orders(45)));
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(small_pages(), source.clone(), store.clone());

        let run = orch.trigger(true, SyncFilters::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.mode, SyncMode::Full);
        assert_eq!(run.pages_fetched, 5);
        assert_eq!(run.records_fetched, 45);
        assert_eq!(run.records_written, 45);
        assert_eq!(run.records_failed, 0);
        assert!(run.finished_at.is_some());
        assert_eq!(store.len(), 45);

        let status = orch.sync_status().await;
        assert!(!status.is_running);
        assert!(status.current_run.is_none());
        assert_eq!(status.last_sync_time, Some(run.started_at));
        assert_eq!(status.sync_stats.total_syncs, 1);
        assert_eq!(status.sync_stats.successful_syncs, 1);
        assert_eq!(status.sync_stats.total_records_processed, 45);
    }

    #[tokio::test]
    async fn test_incremental_sync_uses_last_success() {
        let source = Arc::new(MockSource::new(orders(3)));
        let orch = orchestrator(small_pages(), source.clone(), Arc::new(MemoryStore::new()));

        let first = orch.trigger(false, SyncFilters::default()).await.unwrap();
        assert_eq!(first.filters.updated_after, None);

        let second = orch.trigger(false, SyncFilters::default()).await.unwrap();
        assert_eq!(second.filters.updated_after, Some(first.started_at));
        assert_eq!(
            source.requests().last().unwrap().filters.updated_after,
            Some(first.started_at)
        );

        let full = orch.trigger(true, SyncFilters::default()).await.unwrap();
        assert_eq!(full.filters.updated_after, None);
    }

    #[tokio::test]
    async fn test_explicit_filters_are_kept() {
        let source = Arc::new(MockSource::new(orders(3)));
        let orch = orchestrator(small_pages(), source.clone(), Arc::new(MemoryStore::new()));
        let filters = SyncFilters {
            status: Some("cancelled".to_string()),
            ..Default::default()
        };

        let run = orch.trigger(true, filters.clone()).await.unwrap();
        assert_eq!(run.filters, filters);
        assert_eq!(source.requests()[0].filters, filters);
    }

    #[tokio::test]
    async fn test_max_records_per_run() {
        let config = SyncConfig {
            max_records_per_run: Some(15),
            ..small_pages()
        };
        let orch = orchestrator(
            config,
            Arc::new(MockSource::new(orders(45))),
            Arc::new(MemoryStore::new()),
        );

        let run = orch.trigger(true, SyncFilters::default()).await.unwrap();
        assert_eq!(run.records_fetched, 15);
        assert_eq!(run.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_idempotent_upsert_against_sqlite() {
        let config = small_pages();
        let store = Arc::new(
            SqliteRecordStore::connect(SqliteStoreConfig {
                database_url: "sqlite::memory:".to_string(),
                max_connections: 1,
                rules: config.sanitize_rules(),
                ..Default::default()
            })
            .await
            .unwrap(),
        );
        let orch = Arc::new(
            SyncOrchestrator::builder(
                config,
                Arc::new(MockSource::new(orders(12))),
                store.clone(),
            )
            .build()
            .unwrap(),
        );

        orch.trigger(true, SyncFilters::default()).await.unwrap();
        let before = orch.sync_status().await.sync_stats.total_records_processed;
        let replay = orch.trigger(true, SyncFilters::default()).await.unwrap();
        let after = orch.sync_status().await.sync_stats.total_records_processed;

        assert_eq!(store.count().await.unwrap(), 12);
        assert_eq!(after - before, replay.records_written);
    }

    #[tokio::test]
    async fn test_detailed_stats_lists_recent_runs() {
        let orch = orchestrator(
            small_pages(),
            Arc::new(MockSource::new(orders(2))),
            Arc::new(MemoryStore::new()),
        );
        for _ in 0..(RECENT_RUNS_LIMIT + 3) {
            orch.trigger(false, SyncFilters::default()).await.unwrap();
        }

        let stats = orch.detailed_stats().await;
        assert_eq!(stats.recent_runs.len(), RECENT_RUNS_LIMIT);
        assert_eq!(stats.status.sync_stats.total_syncs, (RECENT_RUNS_LIMIT + 3) as u64);
        assert_eq!(
            stats.recent_runs[0].id,
            stats.status.last_run.as_ref().unwrap().id
        );
        assert_eq!(stats.error_statistics.total_errors, 0);

        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("sync_stats").is_some());
        assert!(json.get("error_statistics").is_some());
    }
}

mod overlap_tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_while_running_is_rejected() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(MockSource::new(orders(25)).gated(Arc::clone(&gate)));
        let orch = orchestrator(small_pages(), source, Arc::new(MemoryStore::new()));

        let background = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.trigger(true, SyncFilters::default()).await })
        };
        wait_until_running(&orch).await;

        let live = orch.sync_status().await.current_run.unwrap();
        let err = orch.trigger(false, SyncFilters::default()).await.unwrap_err();
        match err {
            SyncError::AlreadyRunning { run_id } => assert_eq!(run_id, live.id),
            other => panic!("unexpected error: {other}"),
        }

        gate.add_permits(100);
        let run = background.await.unwrap().unwrap();
        assert_eq!(run.id, live.id);
        assert_eq!(run.records_fetched, 25);
        assert_eq!(run.records_written, 25);
        assert_eq!(orch.sync_status().await.sync_stats.total_syncs, 1);
    }

    #[tokio::test]
    async fn test_status_does_not_block_on_active_run() {
        let gate = Arc::new(Semaphore::new(1));
        let source = Arc::new(MockSource::new(orders(25)).gated(Arc::clone(&gate)));
        let orch = orchestrator(small_pages(), source, Arc::new(MemoryStore::new()));

        let background = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.trigger(true, SyncFilters::default()).await })
        };
        wait_until_running(&orch).await;

        // Page 1 goes through; the run then parks on page 2
        let mut snapshot = None;
        for _ in 0..100 {
            let status = orch.sync_status().await;
            if status.current_run.as_ref().map(|r| r.pages_fetched) == Some(1) {
                snapshot = status.current_run;
                break;
            }
            tokio::task::yield_now().await;
        }
        let snapshot = snapshot.expect("snapshot after first page");
        assert_eq!(snapshot.status, RunStatus::Running);
        assert_eq!(snapshot.records_written, 10);

        gate.add_permits(100);
        background.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_run_releases_flag() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(MockSource::new(orders(5)).gated(Arc::clone(&gate)));
        let orch = orchestrator(small_pages(), source, Arc::new(MemoryStore::new()));

        let background = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.trigger(true, SyncFilters::default()).await })
        };
        wait_until_running(&orch).await;

        background.abort();
        let _ = background.await;
        assert!(!orch.is_running());

        gate.add_permits(100);
        let run = orch.trigger(true, SyncFilters::default()).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_page_timeouts_recover_to_same_counts() {
        let clean = orchestrator(
            small_pages(),
            Arc::new(MockSource::new(orders(45))),
            Arc::new(MemoryStore::new()),
        )
        .trigger(true, SyncFilters::default())
        .await
        .unwrap();

        let flaky_source = Arc::new(
            MockSource::new(orders(45))
                .fault(3, Fault::Hang)
                .fault(3, Fault::Hang),
        );
        let flaky = orchestrator(small_pages(), flaky_source.clone(), Arc::new(MemoryStore::new()))
            .trigger(true, SyncFilters::default())
            .await
            .unwrap();

        assert_eq!(flaky.status, RunStatus::Succeeded);
        assert_eq!(flaky.permanent_failures, 0);
        assert_eq!(flaky.failed_pages, 0);
        assert_eq!(flaky.records_fetched, clean.records_fetched);
        assert_eq!(flaky.records_written, clean.records_written);
        assert_eq!(flaky.records_failed, clean.records_failed);
        assert_eq!(flaky_source.requested_pages(), vec![1, 2, 3, 3, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_malformed_date_rejects_single_record() {
        let mut records = orders(6);
        records[2] = Record::from_value(json!({
            "id": 3,
            "order_number": "SO-00003",
            "date_ordered": "2024-13-45 99:99",
        }))
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(small_pages(), Arc::new(MockSource::new(records)), store.clone());

        let run = orch.trigger(true, SyncFilters::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.records_fetched, 6);
        assert_eq!(run.records_written, 5);
        assert_eq!(run.records_failed, 1);
        assert_eq!(run.rejections.len(), 1);
        assert_eq!(run.rejections[0].record_id.as_deref(), Some("3"));
        assert!(run.rejections[0].reason.contains("date_ordered"));
        assert!(store.get("3").is_none());
        assert!(store.get("4").is_some());
    }

    #[tokio::test]
    async fn test_permanent_fetch_error_fails_run() {
        let source = Arc::new(
            MockSource::new(orders(30))
                .fault(2, Fault::Fail("HTTP 403 Forbidden: token lacks orders:read".into())),
        );
        let orch = orchestrator(small_pages(), source.clone(), Arc::new(MemoryStore::new()));

        let run = orch.trigger(true, SyncFilters::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.permanent_failures, 1);
        assert_eq!(run.records_written, 10);
        assert_eq!(run.error.as_ref().map(|c| c.kind), Some(ErrorKind::Permission));
        assert!(run.last_error.as_deref().unwrap().contains("403"));
        assert_eq!(source.requested_pages(), vec![1, 2]);

        let stats = orch.sync_status().await.sync_stats;
        assert_eq!(stats.failed_syncs, 1);
        assert_eq!(stats.total_records_processed, 0);
        assert_eq!(orch.sync_status().await.last_sync_time, None);
    }

    #[tokio::test]
    async fn test_permanent_write_error_fails_run() {
        let store = Arc::new(
            MemoryStore::new().fault(Fault::Fail("permission denied for relation orders".into())),
        );
        let orch = orchestrator(small_pages(), Arc::new(MockSource::new(orders(30))), store.clone());

        let run = orch.trigger(true, SyncFilters::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.pages_fetched, 1);
        assert_eq!(run.records_written, 0);
        assert_eq!(run.records_failed, 10);
        assert_eq!(store.upsert_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_body_keywords_are_retried() {
        let source = Arc::new(MockSource::new(orders(30)).fault(
            2,
            Fault::Fail(
                r#"HTTP 503 Service Unavailable: {"error":"invalid session state, retry later"}"#
                    .into(),
            ),
        ));
        let orch = orchestrator(small_pages(), source.clone(), Arc::new(MemoryStore::new()));

        let run = orch.trigger(true, SyncFilters::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.permanent_failures, 0);
        assert_eq!(run.failed_pages, 0);
        assert_eq!(run.records_written, 30);
        assert_eq!(source.requested_pages(), vec![1, 2, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_page_is_skipped() {
        let mut source = MockSource::new(orders(30));
        for _ in 0..4 {
            source = source.fault(2, Fault::Fail("HTTP 503 Service Unavailable".into()));
        }
        let source = Arc::new(source);
        let orch = orchestrator(small_pages(), source.clone(), Arc::new(MemoryStore::new()));

        let run = orch.trigger(true, SyncFilters::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.failed_pages, 1);
        assert_eq!(run.permanent_failures, 0);
        assert_eq!(run.records_written, 20);
        assert_eq!(source.requested_pages(), vec![1, 2, 2, 2, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_page_failures_stop_run() {
        let config = SyncConfig {
            max_retries: 1,
            ..small_pages()
        };
        let mut source = MockSource::new(orders(100));
        for page in 1..=3 {
            for _ in 0..2 {
                source = source.fault(page, Fault::Fail("HTTP 502 Bad Gateway".into()));
            }
        }
        let health = HealthRegistry::new();
        health.register_all();
        let orch = Arc::new(
            SyncOrchestrator::builder(config, Arc::new(source), Arc::new(MemoryStore::new()))
                .health(health.clone())
                .build()
                .unwrap(),
        );

        let run = orch.trigger(true, SyncFilters::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failed_pages, 3);
        assert!(run.last_error.as_deref().unwrap().contains("3 consecutive pages failed"));
        assert_eq!(
            health.status_of(Component::Source),
            Some(ComponentStatus::Unhealthy)
        );
    }
}

mod maintenance_tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_cleanup_validates_retention() {
        let orch = orchestrator(
            small_pages(),
            Arc::new(MockSource::new(vec![])),
            Arc::new(MemoryStore::new()),
        );
        assert!(matches!(
            orch.cleanup_old_records(0).await,
            Err(SyncError::InvalidRetention(0))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_deletes_old_records() {
        let mut records = orders(4);
        records.push(Record::from_value(json!({
            "id": 99,
            "order_number": "SO-00099",
            "date_ordered": Utc::now().to_rfc3339(),
        }))
        .unwrap());
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(small_pages(), Arc::new(MockSource::new(records)), store.clone());
        orch.trigger(true, SyncFilters::default()).await.unwrap();

        let report = orch.cleanup_old_records(30).await.unwrap();
        assert_eq!(report.deleted_count, 4);
        assert_eq!(report.days_to_keep, 30);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cleanup_is_rejected() {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(MemoryStore::new().gated_deletes(Arc::clone(&gate)));
        let orch = orchestrator(small_pages(), Arc::new(MockSource::new(vec![])), store);

        let first = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.cleanup_old_records(90).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            orch.cleanup_old_records(90).await,
            Err(SyncError::CleanupInProgress)
        ));

        gate.add_permits(1);
        assert_eq!(first.await.unwrap().unwrap().deleted_count, 0);
        gate.add_permits(1);
        assert!(orch.cleanup_old_records(90).await.is_ok());
    }

    #[tokio::test]
    async fn test_connections_report_classified_failure() {
        let health = HealthRegistry::new();
        health.register_all();
        let source = Arc::new(MockSource::new(vec![order(1)]).unhealthy("connection refused"));
        let orch = SyncOrchestrator::builder(small_pages(), source, Arc::new(MemoryStore::new()))
            .health(health.clone())
            .build()
            .unwrap();

        let report = orch.test_connections().await;

        assert!(!report.all_ok());
        assert!(report.store.ok);
        let error = report.source.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Network);
        assert_eq!(error.context["component"], "source");
        assert_eq!(
            health.status_of(Component::Source),
            Some(ComponentStatus::Unhealthy)
        );
        assert_eq!(
            health.status_of(Component::Store),
            Some(ComponentStatus::Healthy)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_timeout_uses_request_timeout() {
        let config = SyncConfig {
            request_timeout_secs: 2,
            max_retries: 0,
            ..small_pages()
        };
        let source = Arc::new(MockSource::new(orders(5)).fault(1, Fault::Hang));
        let orch = orchestrator(config, source, Arc::new(MemoryStore::new()));

        let started = tokio::time::Instant::now();
        let run = orch.trigger(true, SyncFilters::default()).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(run.failed_pages, 1);
        assert_eq!(
            orch.categorizer().history().last().map(|c| c.kind),
            Some(ErrorKind::Network)
        );
    }
}
