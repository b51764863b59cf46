//! HTTP client for paginated order APIs
//!
//! Accepts either a bare JSON array per page or an object wrapping the
//! page in an envelope field (`{"data": [...], "total": 1234}`).

use super::{PageRequest, RecordSource};
use crate::models::Record;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP {status} {reason}: {body}")]
    Http {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Configuration for the HTTP source
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// API base URL (e.g., "https://erp.example.com/api")
    pub base_url: String,
    /// Collection path under the base URL
    pub path: String,
    pub bearer_token: Option<String>,
    /// Field holding the page when the API wraps it in an object
    pub envelope_field: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            path: "orders".to_string(),
            bearer_token: None,
            envelope_field: "data".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// `RecordSource` backed by a REST endpoint
pub struct HttpRecordSource {
    client: reqwest::Client,
    url: url::Url,
    config: HttpSourceConfig,
}

impl HttpRecordSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let joined = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.path.trim_start_matches('/')
        );
        let url = url::Url::parse(&joined)
            .with_context(|| format!("Bad source URL: {}", joined))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, url, config })
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }

    fn query(request: &PageRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("page", request.page.to_string()),
            ("limit", request.page_size.to_string()),
            ("sort", request.sort.field.clone()),
            ("order", request.sort.direction.as_str().to_string()),
        ];
        let filters = &request.filters;
        if let Some(ts) = filters.date_from {
            query.push(("date_from", ts.to_rfc3339()));
        }
        if let Some(ts) = filters.date_to {
            query.push(("date_to", ts.to_rfc3339()));
        }
        if let Some(ts) = filters.updated_after {
            query.push(("updated_after", ts.to_rfc3339()));
        }
        if let Some(status) = &filters.status {
            query.push(("status", status.clone()));
        }
        query
    }

    fn map_send_error(&self, err: reqwest::Error) -> anyhow::Error {
        if err.is_timeout() {
            SourceError::Timeout {
                url: self.url.to_string(),
                timeout: self.config.request_timeout,
            }
            .into()
        } else {
            anyhow::Error::new(err).context(format!("GET {} failed", self.url))
        }
    }

    fn extract_page(&self, body: Value) -> Result<Vec<Record>> {
        let items = match body {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove(&self.config.envelope_field) {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(SourceError::Shape(format!(
                        "expected an array or an object with '{}' array",
                        self.config.envelope_field
                    ))
                    .into())
                }
            },
            other => {
                return Err(SourceError::Shape(format!(
                    "expected an array, got {}",
                    type_name(&other)
                ))
                .into())
            }
        };

        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let kind = type_name(&item);
                Record::from_value(item).ok_or_else(|| {
                    SourceError::Shape(format!("item {} is {}, not an object", i, kind)).into()
                })
            })
            .collect()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Record>> {
        let mut builder = self.client.get(self.url.clone()).query(&Self::query(request));
        if let Some(token) = &self.config.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(SourceError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                body,
            }
            .into());
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.map_send_error(e)
            } else {
                anyhow::Error::new(e).context(format!("Bad page {} body", request.page))
            }
        })?;

        let records = self.extract_page(body)?;
        debug!(
            page = request.page,
            records = records.len(),
            "Fetched page from source"
        );
        Ok(records)
    }

    async fn health_check(&self) -> Result<()> {
        let probe = PageRequest {
            page: 1,
            page_size: 1,
            filters: Default::default(),
            sort: Default::default(),
        };
        self.fetch_page(&probe)
            .await
            .map(|_| ())
            .context("Source health check failed")
    }
}
