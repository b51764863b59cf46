//! API client for communicating with the order sync daemon

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// API client for the daemon control surface
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// `timeout` bounds every request, including a sync that runs to completion.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.client.get(self.url(path)?), false).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.client.post(self.url(path)?).json(body), false)
            .await
    }

    /// GET a report that the daemon also returns with 503 when a check fails
    pub async fn get_report<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.client.get(self.url(path)?), true).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, report: bool) -> Result<T> {
        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let accepted = status.is_success() || (report && status == StatusCode::SERVICE_UNAVAILABLE);
        if !accepted {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(describe_error(status, &body));
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn trigger_sync(&self, request: &SyncRequest) -> Result<SyncRun> {
        self.post("api/v1/sync", request).await
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        self.get("api/v1/sync/status").await
    }

    pub async fn stats(&self) -> Result<DetailedStats> {
        self.get("api/v1/sync/stats").await
    }

    pub async fn start_schedule(&self, interval_minutes: Option<u64>) -> Result<ScheduleStatus> {
        self.post(
            "api/v1/schedule/start",
            &ScheduleRequest { interval_minutes },
        )
        .await
    }

    pub async fn stop_schedule(&self) -> Result<ScheduleStatus> {
        self.post("api/v1/schedule/stop", &serde_json::json!({})).await
    }

    pub async fn cleanup(&self, days_to_keep: Option<u32>) -> Result<CleanupReport> {
        self.post("api/v1/cleanup", &CleanupRequest { days_to_keep })
            .await
    }

    pub async fn test_connections(&self) -> Result<ConnectionReport> {
        self.get_report("api/v1/connections").await
    }
}

/// Turn a daemon error response into a readable message
fn describe_error(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) if status == StatusCode::CONFLICT => match err.run_id {
            Some(run_id) => format!("{} (try again when run {} finishes)", err.error, run_id),
            None => err.error,
        },
        Ok(err) => format!("API error ({}): {}", status, err.error),
        Err(_) => format!("API error ({}): {}", status, body),
    }
}

// API request and response types

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub full_sync: bool,
    pub filters: SyncFilters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_to_keep: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub mode: String,
    #[serde(default)]
    pub filters: SyncFilters,
    pub pages_fetched: u64,
    pub records_fetched: u64,
    pub records_written: u64,
    pub records_failed: u64,
    pub failed_pages: u64,
    #[serde(default)]
    pub rejections: Vec<Rejection>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncRun {
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub total_records_processed: u64,
    pub last_sync_duration_ms: u64,
    pub average_sync_duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleStatus {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl ScheduleStatus {
    /// "every 30m" or "cron '0 2 * * *'", `None` when stopped
    pub fn cadence(&self) -> Option<String> {
        match (self.active, self.interval_secs, &self.cron) {
            (false, _, _) => None,
            (true, _, Some(expr)) => Some(format!("cron '{}'", expr)),
            (true, Some(secs), None) => Some(format!("every {}", crate::output::format_interval(secs))),
            (true, None, None) => Some("active".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_running: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub current_run: Option<SyncRun>,
    pub last_run: Option<SyncRun>,
    pub sync_stats: SyncStats,
    #[serde(default)]
    pub schedule: ScheduleStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub total_errors: usize,
    pub last_hour: usize,
    pub last_24_hours: usize,
    #[serde(default)]
    pub by_type: BTreeMap<String, usize>,
    #[serde(default)]
    pub by_category: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub message: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedStats {
    pub is_running: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub sync_stats: SyncStats,
    pub error_statistics: ErrorStatistics,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub recent_runs: Vec<SyncRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted_count: u64,
    pub days_to_keep: u32,
    pub cutoff: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub source: ConnectionCheck,
    pub store: ConnectionCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}
