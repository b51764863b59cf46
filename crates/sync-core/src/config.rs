//! Sync configuration
//!
//! Every option has a default so a partially specified config file or
//! environment still yields a usable configuration.

use crate::models::SanitizeRules;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Only one sync run may be live at a time.
pub const MAX_CONCURRENT_SYNCS: u32 = 1;

pub const MAX_SCHEDULE_DAYS: u64 = 366;

/// Longest period a fixed-interval schedule may use
pub const MAX_SCHEDULE_INTERVAL: Duration = Duration::from_secs(MAX_SCHEDULE_DAYS * 24 * 3600);

/// How long error-storm counts survive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    /// Count same-kind errors across runs for the life of the process
    #[default]
    Process,
    /// Forget earlier errors when a new run starts
    PerRun,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("max_concurrent_syncs must be {MAX_CONCURRENT_SYNCS}, got {0}")]
    Concurrency(u32),

    #[error("invalid schedule '{0}': expected minutes, a duration like \"15m\" or a cron expression")]
    Schedule(String),

    #[error("{0} is longer than {MAX_SCHEDULE_DAYS} days")]
    TooLong(&'static str),
}

/// When scheduled syncs fire
#[derive(Debug, Clone)]
pub enum Cadence {
    /// Fixed period, first tick one period after start
    Every(Duration),
    /// Wall-clock times from a cron expression, evaluated in UTC
    Cron {
        expression: String,
        schedule: Box<Schedule>,
    },
}

impl Cadence {
    /// Period of `minutes` minutes, rejecting zero and oversized values
    pub fn minutes(field: &'static str, minutes: u64) -> Result<Self, ConfigError> {
        if minutes == 0 {
            return Err(ConfigError::Zero(field));
        }
        minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .filter(|d| *d <= MAX_SCHEDULE_INTERVAL)
            .map(Cadence::Every)
            .ok_or(ConfigError::TooLong(field))
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            Cadence::Every(period) => Some(*period),
            Cadence::Cron { .. } => None,
        }
    }

    pub fn cron_expression(&self) -> Option<&str> {
        match self {
            Cadence::Every(_) => None,
            Cadence::Cron { expression, .. } => Some(expression),
        }
    }

    /// First fire time strictly after `after`; `None` for fixed periods or
    /// an exhausted cron expression
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Cadence::Every(_) => None,
            Cadence::Cron { schedule, .. } => schedule.after(&after).next(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Cadence::Every(period) => format!("every {}", humantime::format_duration(*period)),
            Cadence::Cron { expression, .. } => format!("cron '{}'", expression),
        }
    }
}

/// Configuration read by the sync core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Records requested per page
    pub page_size: usize,
    /// Records written per store request
    pub batch_size: usize,
    /// Upper bound applied to every classification's retry budget
    pub max_retries: u32,
    /// Base delay for errors that match no known kind
    pub base_retry_delay_ms: u64,
    /// Start the scheduler when the daemon boots
    pub scheduled_sync_enabled: bool,
    /// Scheduler period when no explicit schedule is set
    pub sync_interval_minutes: u64,
    /// Optional schedule expression overriding `sync_interval_minutes`
    pub schedule: Option<String>,
    /// A scheduled tick becomes a full sync once this much time has passed
    pub full_sync_interval_hours: u64,
    pub max_concurrent_syncs: u32,
    /// Default retention for cleanup
    pub days_to_keep: u32,
    /// Timeout for each individual source/store call
    pub request_timeout_secs: u64,
    pub max_records_per_run: Option<usize>,
    /// Consecutive failed pages after which the run is abandoned
    pub max_consecutive_page_failures: u32,
    /// Same-kind errors tolerated inside `storm_window_secs`
    pub storm_threshold: usize,
    pub storm_window_secs: u64,
    pub breaker_scope: BreakerScope,
    pub id_field: String,
    pub business_key_field: String,
    pub date_fields: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            batch_size: 50,
            max_retries: 5,
            base_retry_delay_ms: 5000,
            scheduled_sync_enabled: false,
            sync_interval_minutes: 30,
            schedule: None,
            full_sync_interval_hours: 24,
            max_concurrent_syncs: MAX_CONCURRENT_SYNCS,
            days_to_keep: 90,
            request_timeout_secs: 30,
            max_records_per_run: None,
            max_consecutive_page_failures: 3,
            storm_threshold: 10,
            storm_window_secs: 300,
            breaker_scope: BreakerScope::Process,
            id_field: "id".to_string(),
            business_key_field: "order_number".to_string(),
            date_fields: vec!["date_ordered".to_string()],
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Zero("page_size"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch_size"));
        }
        if self.sync_interval_minutes == 0 {
            return Err(ConfigError::Zero("sync_interval_minutes"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("request_timeout_secs"));
        }
        if self.max_concurrent_syncs != MAX_CONCURRENT_SYNCS {
            return Err(ConfigError::Concurrency(self.max_concurrent_syncs));
        }
        self.cadence()?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn storm_window(&self) -> Duration {
        Duration::from_secs(self.storm_window_secs)
    }

    pub fn full_sync_interval(&self) -> Duration {
        Duration::from_secs(self.full_sync_interval_hours.saturating_mul(3600))
    }

    /// Resolved scheduler cadence
    pub fn cadence(&self) -> Result<Cadence, ConfigError> {
        match self.schedule.as_deref() {
            Some(expr) => parse_schedule(expr),
            None => Cadence::minutes("sync_interval_minutes", self.sync_interval_minutes),
        }
    }

    pub fn sanitize_rules(&self) -> SanitizeRules {
        SanitizeRules {
            id_field: self.id_field.clone(),
            business_key_field: self.business_key_field.clone(),
            date_fields: self.date_fields.clone(),
        }
    }
}

/// Largest step per cron field, seconds first
const CRON_FIELD_MAX: [u32; 6] = [59, 59, 23, 31, 12, 7];

/// Parse a schedule expression.
///
/// Accepts bare minutes (`"15"`), humantime durations (`"15m"`, `"1h 30m"`)
/// and cron expressions. Five-field expressions (`"0 9 * * Mon"`) fire at
/// second zero; six and seven field forms are passed to `cron` as is.
/// Numeric weekdays follow `cron`, where 1 is Sunday.
pub fn parse_schedule(expr: &str) -> Result<Cadence, ConfigError> {
    let expr = expr.trim();
    let invalid = || ConfigError::Schedule(expr.to_string());

    if let Ok(minutes) = expr.parse::<u64>() {
        return match minutes {
            0 => Err(invalid()),
            m => Cadence::minutes("schedule", m),
        };
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    if (5..=7).contains(&fields.len()) {
        let normalized = match fields.len() {
            5 => format!("0 {}", fields.join(" ")),
            _ => fields.join(" "),
        };
        let normalized_fields: Vec<&str> = normalized.split_whitespace().collect();
        if !steps_in_range(&normalized_fields) {
            return Err(invalid());
        }
        let schedule = Schedule::from_str(&normalized).map_err(|_| invalid())?;
        if schedule.upcoming(Utc).next().is_none() {
            return Err(invalid());
        }
        return Ok(Cadence::Cron {
            expression: expr.to_string(),
            schedule: Box::new(schedule),
        });
    }

    match humantime::parse_duration(expr) {
        Ok(d) if d.is_zero() => Err(invalid()),
        Ok(d) if d > MAX_SCHEDULE_INTERVAL => Err(ConfigError::TooLong("schedule")),
        Ok(d) => Ok(Cadence::Every(d)),
        Err(_) => Err(invalid()),
    }
}

/// `cron` wraps out-of-range steps such as `*/90` instead of rejecting them
fn steps_in_range(fields: &[&str]) -> bool {
    fields.iter().zip(CRON_FIELD_MAX).all(|(field, max)| {
        field.split(',').all(|part| match part.split_once('/') {
            Some((_, step)) => step.parse::<u32>().map_or(false, |n| (1..=max).contains(&n)),
            None => true,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_concurrent_syncs, 1);
        assert_eq!(config.breaker_scope, BreakerScope::Process);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.cadence().unwrap().interval(),
            Some(Duration::from_secs(30 * 60))
        );
    }

    #[test]
    fn test_validate_rejects_concurrency() {
        let config = SyncConfig {
            max_concurrent_syncs: 2,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Concurrency(2)));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = SyncConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("batch_size")));
    }

    fn every(expr: &str) -> Option<Duration> {
        parse_schedule(expr).unwrap().interval()
    }

    #[test]
    fn test_parse_schedule_intervals() {
        assert_eq!(every("15"), Some(Duration::from_secs(900)));
        assert_eq!(every("15m"), Some(Duration::from_secs(900)));
        assert_eq!(every("1h 30m"), Some(Duration::from_secs(5400)));
        assert!(parse_schedule("0").is_err());
        assert!(parse_schedule("soon").is_err());
    }

    #[test]
    fn test_parse_schedule_cron() {
        let at = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .unwrap()
                .with_timezone(&Utc)
        };

        // 2024-03-04 is a Monday
        let weekly = parse_schedule("0 9 * * Mon").unwrap();
        assert_eq!(weekly.cron_expression(), Some("0 9 * * Mon"));
        assert_eq!(weekly.interval(), None);
        assert_eq!(
            weekly.next_after(at("2024-03-01T12:00:00Z")),
            Some(at("2024-03-04T09:00:00Z"))
        );

        let nightly = parse_schedule("0 0 * * *").unwrap();
        assert_eq!(
            nightly.next_after(at("2024-03-01T12:00:00Z")),
            Some(at("2024-03-02T00:00:00Z"))
        );

        let quarter = parse_schedule("*/15 * * * *").unwrap();
        assert_eq!(
            quarter.next_after(at("2024-03-01T12:07:30Z")),
            Some(at("2024-03-01T12:15:00Z"))
        );

        // Six-field form with explicit seconds
        assert!(parse_schedule("30 0 9 * * Mon-Fri").is_ok());
    }

    #[test]
    fn test_parse_schedule_rejects_bad_cron() {
        assert!(parse_schedule("*/90 * * * *").is_err());
        assert!(parse_schedule("0 */0 * * *").is_err());
        assert!(parse_schedule("61 * * * *").is_err());
        assert!(parse_schedule("0 9 * * funday").is_err());
    }

    #[test]
    fn test_oversized_intervals_rejected() {
        assert_eq!(
            Cadence::minutes("interval_minutes", u64::MAX / 10).unwrap_err(),
            ConfigError::TooLong("interval_minutes")
        );
        assert_eq!(
            parse_schedule(&u64::MAX.to_string()).unwrap_err(),
            ConfigError::TooLong("schedule")
        );
        assert_eq!(
            parse_schedule("400days").unwrap_err(),
            ConfigError::TooLong("schedule")
        );
        let config = SyncConfig {
            sync_interval_minutes: u64::MAX,
            full_sync_interval_hours: u64::MAX,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooLong("sync_interval_minutes"))
        );
        assert_eq!(config.full_sync_interval(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: SyncConfig =
            serde_json::from_str(r#"{ "page_size": 25, "breaker_scope": "per_run" }"#).unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.breaker_scope, BreakerScope::PerRun);
    }
}
