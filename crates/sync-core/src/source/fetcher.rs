//! Page-by-page record fetching
//!
//! Pages are requested strictly in order with a stable sort. A failed page
//! is retried in place according to the categorizer's policy; the cursor
//! only moves past it when the caller explicitly skips it.

use super::{PageRequest, RecordSource};
use crate::config::SyncConfig;
use crate::errors::{with_retry, ErrorCategorizer, RetryContext, UnitFailure};
use crate::models::{Record, SortSpec, SyncFilters};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub page_size: usize,
    /// Bound on each page request
    pub request_timeout: Duration,
    pub sort: SortSpec,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for FetcherConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            request_timeout: config.request_timeout(),
            sort: SortSpec::ascending(config.id_field.clone()),
        }
    }
}

/// One fetched page
#[derive(Debug, Clone)]
pub struct Page {
    pub number: u32,
    pub records: Vec<Record>,
}

/// Fetches pages from a `RecordSource` with retry
pub struct RecordFetcher {
    source: Arc<dyn RecordSource>,
    categorizer: Arc<ErrorCategorizer>,
    retry_ctx: RetryContext,
    config: FetcherConfig,
}

impl RecordFetcher {
    pub fn new(
        source: Arc<dyn RecordSource>,
        categorizer: Arc<ErrorCategorizer>,
        retry_ctx: RetryContext,
        config: FetcherConfig,
    ) -> Self {
        Self {
            source,
            categorizer,
            retry_ctx,
            config,
        }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetch a single page, retrying the same page on failure
    pub async fn fetch_page(
        &self,
        page: u32,
        page_size: usize,
        filters: &SyncFilters,
        sort: &SortSpec,
    ) -> Result<Vec<Record>, UnitFailure> {
        let request = PageRequest {
            page,
            page_size,
            filters: filters.clone(),
            sort: sort.clone(),
        };
        let context = BTreeMap::from([("page".to_string(), page.to_string())]);

        let source = &self.source;
        let request = &request;
        with_retry(
            &self.categorizer,
            &self.retry_ctx,
            self.config.request_timeout,
            "fetch_page",
            context,
            move || source.fetch_page(request),
        )
        .await
    }

    /// Lazily walk pages matching `filters`, stopping after `max_records`
    pub fn pages(&self, filters: SyncFilters, max_records: Option<usize>) -> PageCursor<'_> {
        PageCursor {
            fetcher: self,
            filters,
            next_page: 1,
            fetched: 0,
            max_records,
            done: max_records == Some(0),
        }
    }

    /// Fetch every matching record, failing on the first page whose
    /// retries run out
    pub async fn fetch_all(
        &self,
        filters: SyncFilters,
        max_records: Option<usize>,
    ) -> Result<Vec<Record>, UnitFailure> {
        let mut cursor = self.pages(filters, max_records);
        let mut records = Vec::new();
        while let Some(page) = cursor.next_page().await? {
            records.extend(page.records);
        }
        Ok(records)
    }
}

/// Position in a paginated walk
pub struct PageCursor<'a> {
    fetcher: &'a RecordFetcher,
    filters: SyncFilters,
    next_page: u32,
    fetched: usize,
    max_records: Option<usize>,
    done: bool,
}

impl PageCursor<'_> {
    /// Page number the next call will request
    pub fn position(&self) -> u32 {
        self.next_page
    }

    pub fn records_fetched(&self) -> usize {
        self.fetched
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fetch the next page.
    ///
    /// Returns `Ok(None)` once the data is exhausted. On error the cursor
    /// stays on the failed page.
    pub async fn next_page(&mut self) -> Result<Option<Page>, UnitFailure> {
        if self.done {
            return Ok(None);
        }

        let page_size = self.fetcher.config.page_size;
        let number = self.next_page;
        let mut records = self
            .fetcher
            .fetch_page(number, page_size, &self.filters, &self.fetcher.config.sort)
            .await?;

        if records.len() < page_size {
            self.done = true;
        }
        if let Some(max) = self.max_records {
            let remaining = max.saturating_sub(self.fetched);
            if records.len() >= remaining {
                records.truncate(remaining);
                self.done = true;
            }
        }

        self.next_page += 1;
        self.fetched += records.len();
        debug!(
            page = number,
            records = records.len(),
            total = self.fetched,
            "Page fetched"
        );

        if records.is_empty() {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(Page { number, records }))
    }

    /// Move past a page whose retries were exhausted
    pub fn skip_failed_page(&mut self) {
        warn!(page = self.next_page, "Skipping failed page");
        self.next_page += 1;
    }
}
