//! Recurring sync trigger
//!
//! The scheduler owns at most one timer task. Each tick spawns the run as
//! its own task, so stopping or replacing the timer never cancels a run
//! that is already in flight. Fixed periods tick on a tokio interval; cron
//! cadences sleep until the next wall-clock fire time.

use crate::config::{Cadence, SyncConfig, MAX_SCHEDULE_INTERVAL};
use crate::error::SyncResult;
use crate::health::{Component, ComponentHealth, ComponentStatus, HealthRegistry};
use crate::models::SyncFilters;
use crate::observability::StructuredLogger;
use crate::sync::{SyncMode, SyncOrchestrator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

struct Timer {
    cadence: Cadence,
    started_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

impl Timer {
    fn next_run_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.cadence {
            Cadence::Every(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                let elapsed = (now - self.started_at).num_milliseconds().max(0);
                let ticks = elapsed / period.num_milliseconds().max(1) + 1;
                Some(self.started_at + period * i32::try_from(ticks).ok()?)
            }
            cron => cron.next_after(now),
        }
    }
}

pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    default_cadence: Cadence,
    full_sync_interval: Duration,
    timer: Mutex<Option<Timer>>,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

/// Mode for a scheduled tick: full once `full_interval` has passed since
/// the last full run (or if there never was one), incremental otherwise
pub fn scheduled_mode(
    last_full: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    full_interval: Duration,
) -> SyncMode {
    match last_full {
        None => SyncMode::Full,
        Some(at) => match (now - at).to_std() {
            Ok(elapsed) if elapsed >= full_interval => SyncMode::Full,
            _ => SyncMode::Scheduled,
        },
    }
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, config: &SyncConfig) -> SyncResult<Self> {
        Ok(Self {
            orchestrator,
            default_cadence: config.cadence()?,
            full_sync_interval: config.full_sync_interval(),
            timer: Mutex::new(None),
            health: None,
            logger: StructuredLogger::new("scheduler"),
        })
    }

    /// Report timer state to `registry` as the scheduler component
    pub fn with_health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    fn timer(&self) -> MutexGuard<'_, Option<Timer>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report(&self, health: ComponentHealth) {
        if let Some(registry) = &self.health {
            registry.update(Component::Scheduler, health);
        }
    }

    /// Start the timer in minutes, or with the configured cadence
    pub fn start_scheduled_sync(&self, interval_minutes: Option<u64>) -> SyncResult<ScheduleStatus> {
        let cadence = match interval_minutes {
            Some(minutes) => Cadence::minutes("interval_minutes", minutes)?,
            None => self.default_cadence.clone(),
        };
        Ok(self.start_cadence(cadence))
    }

    pub fn stop_scheduled_sync(&self) -> ScheduleStatus {
        self.stop();
        self.status()
    }

    /// Start ticking every `interval`; an existing timer is replaced.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) -> ScheduleStatus {
        let interval = interval.clamp(Duration::from_secs(1), MAX_SCHEDULE_INTERVAL);
        self.start_cadence(Cadence::Every(interval))
    }

    pub fn start_cadence(&self, cadence: Cadence) -> ScheduleStatus {
        let description = cadence.describe();
        let mut timer = self.timer();
        if let Some(old) = timer.take() {
            old.handle.abort();
            info!(
                old = %old.cadence.describe(),
                new = %description,
                "Replacing sync schedule"
            );
        }

        let handle = tokio::spawn(tick_loop(
            Arc::clone(&self.orchestrator),
            cadence.clone(),
            self.full_sync_interval,
        ));
        *timer = Some(Timer {
            cadence,
            started_at: Utc::now(),
            handle,
        });
        drop(timer);

        self.logger.log_schedule_change(true, Some(&description));
        self.report(ComponentHealth::new(
            ComponentStatus::Healthy,
            Some(format!("scheduled sync {}", description)),
        ));
        self.status()
    }

    /// Stop future ticks. A run already in flight finishes normally.
    pub fn stop(&self) {
        match self.timer().take() {
            Some(timer) => {
                timer.handle.abort();
                self.logger.log_schedule_change(false, None);
                self.report(ComponentHealth::idle("scheduled sync stopped"));
            }
            None => debug!("Scheduler not running, nothing to stop"),
        }
    }

    pub fn is_active(&self) -> bool {
        self.timer().is_some()
    }

    pub fn status(&self) -> ScheduleStatus {
        match self.timer().as_ref() {
            Some(timer) => ScheduleStatus {
                active: true,
                interval_secs: timer.cadence.interval().map(|d| d.as_secs()),
                cron: timer.cadence.cron_expression().map(str::to_string),
                started_at: Some(timer.started_at),
                next_run_at: timer.next_run_at(Utc::now()),
            },
            None => ScheduleStatus::default(),
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer().take() {
            timer.handle.abort();
        }
    }
}

async fn tick_loop(
    orchestrator: Arc<SyncOrchestrator>,
    cadence: Cadence,
    full_sync_interval: Duration,
) {
    match cadence {
        Cadence::Every(period) => {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                fire(&orchestrator, full_sync_interval).await;
            }
        }
        cron => {
            let mut cursor = Utc::now();
            loop {
                // Missed fire times are skipped, not replayed
                let Some(next) = cron.next_after(cursor.max(Utc::now())) else {
                    warn!(schedule = %cron.describe(), "Cron schedule has no further fire times");
                    return;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                cursor = next;
                fire(&orchestrator, full_sync_interval).await;
            }
        }
    }
}

async fn fire(orchestrator: &Arc<SyncOrchestrator>, full_sync_interval: Duration) {
    if orchestrator.is_running() {
        info!("Scheduled tick skipped, a sync is already running");
        return;
    }

    let mode = scheduled_mode(
        orchestrator.last_full_sync_at().await,
        Utc::now(),
        full_sync_interval,
    );
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move {
        match orchestrator.trigger_sync(mode, SyncFilters::default()).await {
            Ok(run) => debug!(run_id = %run.id, status = %run.status, "Scheduled sync finished"),
            Err(e) if e.is_already_running() => {
                info!("Scheduled tick skipped, a sync is already running")
            }
            Err(e) => warn!(error = %e, "Scheduled sync could not start"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::RunStatus;
    use crate::testing::{orders, MemoryStore, MockSource};
    use chrono::Duration as ChronoDuration;
    use tokio::sync::Semaphore;

    const MINUTE: Duration = Duration::from_secs(60);

    fn orchestrator(source: MockSource) -> Arc<SyncOrchestrator> {
        orchestrator_with(SyncConfig::default(), source)
    }

    fn orchestrator_with(config: SyncConfig, source: MockSource) -> Arc<SyncOrchestrator> {
        Arc::new(
            SyncOrchestrator::builder(
                config,
                Arc::new(source),
                Arc::new(MemoryStore::new()),
            )
            .build()
            .unwrap(),
        )
    }

    async fn total_syncs(orchestrator: &SyncOrchestrator) -> u64 {
        orchestrator.sync_status().await.sync_stats.total_syncs
    }

    #[test]
    fn test_scheduled_mode() {
        let now = Utc::now();
        let day = Duration::from_secs(24 * 3600);
        assert_eq!(scheduled_mode(None, now, day), SyncMode::Full);
        assert_eq!(
            scheduled_mode(Some(now - ChronoDuration::hours(2)), now, day),
            SyncMode::Scheduled
        );
        assert_eq!(
            scheduled_mode(Some(now - ChronoDuration::hours(25)), now, day),
            SyncMode::Full
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let orch = orchestrator(MockSource::new(orders(5)));
        let scheduler = SyncScheduler::new(Arc::clone(&orch), &SyncConfig::default()).unwrap();

        scheduler.start(10 * MINUTE);
        tokio::time::sleep(9 * MINUTE).await;
        assert_eq!(total_syncs(&orch).await, 0);

        tokio::time::sleep(2 * MINUTE).await;
        assert_eq!(total_syncs(&orch).await, 1);

        // The first scheduled run is full, the next one incremental
        tokio::time::sleep(10 * MINUTE).await;
        let status = orch.sync_status().await;
        assert_eq!(status.sync_stats.total_syncs, 2);
        assert_eq!(status.last_run.unwrap().mode, SyncMode::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_replaces_timer() {
        let orch = orchestrator(MockSource::new(orders(5)));
        let scheduler = SyncScheduler::new(Arc::clone(&orch), &SyncConfig::default()).unwrap();

        scheduler.start(10 * MINUTE);
        let status = scheduler.start(30 * MINUTE);
        assert_eq!(status.interval_secs, Some(1800));

        tokio::time::sleep(61 * MINUTE).await;
        assert_eq!(total_syncs(&orch).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_halts_ticks() {
        let orch = orchestrator(MockSource::new(orders(5)));
        let scheduler = SyncScheduler::new(Arc::clone(&orch), &SyncConfig::default()).unwrap();

        scheduler.stop();
        assert!(!scheduler.is_active());

        scheduler.start(5 * MINUTE);
        tokio::time::sleep(6 * MINUTE).await;
        scheduler.stop();
        scheduler.stop();
        tokio::time::sleep(30 * MINUTE).await;

        assert_eq!(total_syncs(&orch).await, 1);
        assert_eq!(scheduler.status(), ScheduleStatus::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_does_not_abort_running_sync() {
        let gate = Arc::new(Semaphore::new(0));
        let orch = orchestrator(MockSource::new(orders(5)).gated(Arc::clone(&gate)));
        let scheduler = SyncScheduler::new(Arc::clone(&orch), &SyncConfig::default()).unwrap();

        scheduler.start(MINUTE);
        tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;
        assert!(orch.is_running());

        scheduler.stop();
        gate.add_permits(100);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let status = orch.sync_status().await;
        assert!(!status.is_running);
        assert_eq!(status.last_run.unwrap().status, RunStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_skipped_while_run_is_live() {
        let config = SyncConfig {
            request_timeout_secs: 3600,
            ..Default::default()
        };
        let gate = Arc::new(Semaphore::new(0));
        let orch = orchestrator_with(
            config.clone(),
            MockSource::new(orders(5)).gated(Arc::clone(&gate)),
        );
        let scheduler = SyncScheduler::new(Arc::clone(&orch), &config).unwrap();

        // Ticks at 1, 2 and 3 minutes; the first run holds the gate throughout
        scheduler.start(MINUTE);
        tokio::time::sleep(3 * MINUTE + Duration::from_secs(30)).await;
        assert!(orch.is_running());
        assert_eq!(total_syncs(&orch).await, 0);

        scheduler.stop();
        gate.add_permits(100);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(total_syncs(&orch).await, 1);
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let orch = orchestrator(MockSource::new(orders(1)));
        let scheduler = SyncScheduler::new(orch, &SyncConfig::default()).unwrap();
        assert!(scheduler.start_scheduled_sync(Some(0)).is_err());
        assert!(!scheduler.is_active());
    }

    #[tokio::test]
    async fn test_oversized_interval_rejected() {
        let orch = orchestrator(MockSource::new(orders(1)));
        let scheduler = SyncScheduler::new(orch, &SyncConfig::default()).unwrap();

        let err = scheduler.start_scheduled_sync(Some(u64::MAX / 10)).unwrap_err();
        assert!(err.to_string().contains("interval_minutes"));
        assert!(!scheduler.is_active());

        // One year is still accepted
        let status = scheduler.start_scheduled_sync(Some(365 * 24 * 60)).unwrap();
        assert_eq!(status.interval_secs, Some(365 * 24 * 3600));
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_cron_cadence_status() {
        let config = SyncConfig {
            schedule: Some("0 2 * * *".to_string()),
            ..Default::default()
        };
        let orch = orchestrator(MockSource::new(orders(1)));
        let scheduler = SyncScheduler::new(orch, &config).unwrap();

        let status = scheduler.start_scheduled_sync(None).unwrap();
        assert!(status.active);
        assert_eq!(status.interval_secs, None);
        assert_eq!(status.cron.as_deref(), Some("0 2 * * *"));
        let next = status.next_run_at.unwrap();
        assert!(next > Utc::now());
        assert_eq!(next.format("%H:%M:%S").to_string(), "02:00:00");
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_start_and_stop_report_health() {
        let health = HealthRegistry::new();
        health.register_all();
        let orch = orchestrator(MockSource::new(orders(1)));
        let scheduler = SyncScheduler::new(orch, &SyncConfig::default())
            .unwrap()
            .with_health(health.clone());

        assert_eq!(
            health.status_of(Component::Scheduler),
            Some(ComponentStatus::Idle)
        );

        scheduler.start_scheduled_sync(Some(15)).unwrap();
        let component = health.get(Component::Scheduler).unwrap();
        assert_eq!(component.status, ComponentStatus::Healthy);
        assert_eq!(component.message.as_deref(), Some("scheduled sync every 15m"));

        scheduler.stop();
        assert_eq!(
            health.status_of(Component::Scheduler),
            Some(ComponentStatus::Idle)
        );
    }
}
