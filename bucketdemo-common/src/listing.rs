//! Marker-based bucket listing.
//!
//! A [`BucketLister`] is a forward-only cursor: it fetches one page at a
//! time through the retry policy and hands out entries one by one. A page
//! holding exactly `page_size` entries always triggers another request, so a
//! listing whose size is an exact multiple of the page size ends with one
//! empty page.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::backend::{ListRequest, StorageBackend};
use crate::error::StorageError;
use crate::retry::{RetryParams, RetryPolicy};
use crate::stat::ObjectStat;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Parameters of a `listbucket` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListOptions {
    /// `/bucket` or `/bucket/partial-key`.
    pub prefix: String,
    pub delimiter: Option<String>,
    pub page_size: usize,
    /// Start after this filename instead of at the beginning.
    pub marker: Option<String>,
    /// Overrides the storage handle's retry params for this listing.
    pub retry_params: Option<RetryParams>,
}

impl ListOptions {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: None,
            page_size: DEFAULT_PAGE_SIZE,
            marker: None,
            retry_params: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn with_retry_params(mut self, params: RetryParams) -> Self {
        self.retry_params = Some(params);
        self
    }
}

/// Position of a listing between pages.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingCursor {
    pub prefix: String,
    /// Last filename of the previous full page; `None` before the first page.
    pub marker: Option<String>,
    pub delimiter: Option<String>,
    pub page_size: usize,
}

pub struct BucketLister {
    backend: Arc<dyn StorageBackend>,
    policy: RetryPolicy,
    cursor: ListingCursor,
    page: VecDeque<ObjectStat>,
    pages_fetched: usize,
    done: bool,
}

impl BucketLister {
    pub(crate) fn new(
        backend: Arc<dyn StorageBackend>,
        policy: RetryPolicy,
        options: ListOptions,
    ) -> Result<Self, StorageError> {
        if options.page_size == 0 {
            return Err(StorageError::Configuration(
                "page_size must be at least 1".to_string(),
            ));
        }
        if options.delimiter.as_deref() == Some("") {
            return Err(StorageError::Configuration(
                "delimiter must not be empty".to_string(),
            ));
        }
        Ok(Self {
            backend,
            policy,
            cursor: ListingCursor {
                prefix: options.prefix,
                marker: options.marker,
                delimiter: options.delimiter,
                page_size: options.page_size,
            },
            page: VecDeque::new(),
            pages_fetched: 0,
            done: false,
        })
    }

    pub fn cursor(&self) -> &ListingCursor {
        &self.cursor
    }

    /// Number of page requests that have completed so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Next entry, fetching another page when the current one is drained.
    ///
    /// A failed fetch is returned once and ends the listing; entries already
    /// returned are unaffected.
    pub async fn next_stat(&mut self) -> Option<Result<ObjectStat, StorageError>> {
        loop {
            if let Some(stat) = self.page.pop_front() {
                return Some(Ok(stat));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fetch_page().await {
                self.done = true;
                return Some(Err(e));
            }
        }
    }

    /// Drain the listing into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<ObjectStat>, StorageError> {
        let mut stats = Vec::new();
        while let Some(stat) = self.next_stat().await {
            stats.push(stat?);
        }
        Ok(stats)
    }

    async fn fetch_page(&mut self) -> Result<(), StorageError> {
        let request = ListRequest {
            prefix: self.cursor.prefix.clone(),
            marker: self.cursor.marker.clone(),
            delimiter: self.cursor.delimiter.clone(),
            max_keys: self.cursor.page_size,
        };
        let backend = &self.backend;
        let req = &request;
        let page = self
            .policy
            .execute("listbucket", move || backend.list_page(req))
            .await?;
        self.pages_fetched += 1;

        debug!(
            prefix = %request.prefix,
            marker = ?request.marker,
            entries = page.len(),
            "Fetched listing page"
        );

        match page.last() {
            Some(last) if page.len() == self.cursor.page_size => {
                self.cursor.marker = Some(last.filename.clone());
            }
            _ => self.done = true,
        }
        self.page.extend(page);
        Ok(())
    }
}
