//! Remote record source
//!
//! This module provides:
//! - The `RecordSource` seam the orchestrator pulls pages through
//! - An HTTP implementation for paginated order APIs
//! - The `RecordFetcher` that walks pages with per-page retry

mod fetcher;
mod http;

pub use fetcher::{FetcherConfig, Page, PageCursor, RecordFetcher};
pub use http::{HttpRecordSource, HttpSourceConfig, SourceError};

use crate::models::{Record, SortSpec, SyncFilters};
use anyhow::Result;
use async_trait::async_trait;

/// One page request; pages are numbered from 1
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: usize,
    pub filters: SyncFilters,
    pub sort: SortSpec,
}

/// A paginated collection of records on the remote side
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch one page, ordered by `request.sort`
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Record>>;

    /// Cheap reachability probe
    async fn health_check(&self) -> Result<()>;
}
