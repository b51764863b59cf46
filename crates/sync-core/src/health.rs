//! Component health for the sync daemon
//!
//! The orchestrator reports source and store health after every run and
//! connection test, and the scheduler reports whether its timer is live.
//! Liveness is the worst component state, but readiness only depends on
//! the store: with the source down the daemon can still answer status,
//! stats and cleanup requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Source,
    Store,
    Scheduler,
    Orchestrator,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Source,
        Component::Store,
        Component::Scheduler,
        Component::Orchestrator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Source => "source",
            Component::Store => "store",
            Component::Scheduler => "scheduler",
            Component::Orchestrator => "orchestrator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Nothing to report yet, or deliberately switched off (a stopped schedule)
    Idle,
    /// Working, but the last run skipped pages or failed
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    fn rank(&self) -> u8 {
        match self {
            ComponentStatus::Healthy | ComponentStatus::Idle => 0,
            ComponentStatus::Degraded => 1,
            ComponentStatus::Unhealthy => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Run whose outcome set this state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_run_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn idle(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Idle, Some(message.into()))
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }

    pub fn for_run(mut self, run_id: &str) -> Self {
        self.last_run_id = Some(run_id.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    components: BTreeMap<Component, ComponentHealth>,
    ready: bool,
}

/// Shared, cheaply cloned health view. Updates never block on I/O, so the
/// registry uses a plain lock and can be written from sync code.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register every component. The scheduler starts idle until a
    /// schedule is started; everything else starts healthy.
    pub fn register_all(&self) {
        let mut inner = self.write();
        for component in Component::ALL {
            let health = match component {
                Component::Scheduler => ComponentHealth::idle("scheduled sync not started"),
                _ => ComponentHealth::healthy(),
            };
            inner.components.insert(component, health);
        }
    }

    pub fn update(&self, component: Component, health: ComponentHealth) {
        self.write().components.insert(component, health);
    }

    pub fn set_healthy(&self, component: Component) {
        self.update(component, ComponentHealth::healthy());
    }

    pub fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.update(component, ComponentHealth::degraded(message));
    }

    pub fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.update(component, ComponentHealth::unhealthy(message));
    }

    pub fn get(&self, component: Component) -> Option<ComponentHealth> {
        self.read().components.get(&component).cloned()
    }

    pub fn status_of(&self, component: Component) -> Option<ComponentStatus> {
        self.read().components.get(&component).map(|h| h.status)
    }

    pub fn set_ready(&self, ready: bool) {
        self.write().ready = ready;
    }

    /// Worst component state. A failing source is reported as degraded
    /// overall; only a failing store makes the daemon unhealthy.
    pub fn health(&self) -> HealthResponse {
        let components = self.read().components.clone();
        let status = components
            .iter()
            .map(|(component, health)| match (component, health.status) {
                (Component::Store, status) => status,
                (_, ComponentStatus::Unhealthy) => ComponentStatus::Degraded,
                (_, status) => status,
            })
            .max_by_key(ComponentStatus::rank)
            .filter(|s| *s != ComponentStatus::Idle)
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse { status, components }
    }

    pub fn readiness(&self) -> ReadinessResponse {
        let inner = self.read();
        let store = inner.components.get(&Component::Store).map(|h| h.status);
        let reason = if !inner.ready {
            Some("daemon not yet initialized".to_string())
        } else if store == Some(ComponentStatus::Unhealthy) {
            Some("store unavailable".to_string())
        } else {
            None
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
