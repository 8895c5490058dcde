//! Sequential, lazy pagination over a collection endpoint.

use super::client::{ApiUrls, JSON_MEDIA_TYPE, RateLimitStatus, paged};
use super::fetcher::{ResilientFetcher, StatusClass};
use core::marker::PhantomData;
use serde::de::DeserializeOwned;

const LOG_TARGET: &str = "  paginate";

/// Walks `endpoint` one page at a time, yielding each page's items on demand.
///
/// The sequence ends at the first empty page, after `max_pages` pages, or when the
/// endpoint reports not-found. A page that cannot be fetched or parsed gets a few more
/// tries on a fresh identity and is then skipped; several skips in a row end the sequence.
#[derive(Debug)]
pub struct Paginator<'a, T> {
    fetcher: &'a mut ResilientFetcher,
    api: &'a ApiUrls,
    endpoint: String,
    per_page: u32,
    max_pages: Option<u32>,
    page: u32,
    pages_yielded: u32,
    failures: u32,
    consecutive_skips: u32,
    skipped: u32,
    finished: bool,
    _items: PhantomData<fn() -> T>,
}

impl<'a, T: DeserializeOwned> Paginator<'a, T> {
    pub fn new(fetcher: &'a mut ResilientFetcher, api: &'a ApiUrls, endpoint: impl Into<String>, per_page: u32) -> Self {
        Self {
            fetcher,
            api,
            endpoint: endpoint.into(),
            per_page,
            max_pages: None,
            page: 1,
            pages_yielded: 0,
            failures: 0,
            consecutive_skips: 0,
            skipped: 0,
            finished: false,
            _items: PhantomData,
        }
    }

    #[must_use]
    pub const fn max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Page number the next call will request.
    #[must_use]
    pub const fn current_page(&self) -> u32 {
        self.page
    }

    /// Pages given up on so far.
    #[must_use]
    pub const fn skipped_pages(&self) -> u32 {
        self.skipped
    }

    /// Fetch the next non-empty page, or `None` once the sequence is over.
    pub async fn next_page(&mut self) -> Option<Vec<T>> {
        while !self.finished {
            if self.max_pages.is_some_and(|max| self.pages_yielded >= max) {
                self.finished = true;
                break;
            }

            let url = paged(&self.endpoint, self.per_page, self.page);
            let fetched = self.fetcher.fetch(&url, JSON_MEDIA_TYPE).await;

            if fetched.is_not_found() {
                log::debug!(target: LOG_TARGET, "'{}' has no page {}", self.endpoint, self.page);
                self.finished = true;
                break;
            }

            match fetched.body.as_deref().map(serde_json::from_str::<Vec<T>>) {
                Some(Ok(items)) => {
                    self.failures = 0;
                    self.consecutive_skips = 0;

                    if items.is_empty() {
                        self.finished = true;
                        break;
                    }

                    log::debug!(target: LOG_TARGET, "Fetched page {} of '{}' ({} item(s))", self.page, self.endpoint, items.len());
                    self.page += 1;
                    self.pages_yielded += 1;
                    return Some(items);
                }

                Some(Err(e)) => {
                    log::warn!(target: LOG_TARGET, "Malformed page {} of '{}': {e}", self.page, self.endpoint);
                    self.page_failed(StatusClass::Other).await;
                }

                None => self.page_failed(fetched.status).await,
            }
        }

        None
    }

    async fn page_failed(&mut self, status: StatusClass) {
        let policy = *self.fetcher.policy();

        if status == StatusClass::RateLimited && !self.fetcher.rotator().is_enabled() && self.wait_for_quota().await {
            return;
        }

        self.failures += 1;
        if self.failures <= policy.page_retries {
            log::warn!(
                target: LOG_TARGET,
                "Page {} of '{}' failed (retry {}/{}), rotating identity",
                self.page,
                self.endpoint,
                self.failures,
                policy.page_retries
            );
            self.fetcher.rotator_mut().force_rotate();
            tokio::time::sleep(policy.backoff_step.saturating_mul(self.failures)).await;
            return;
        }

        log::error!(target: LOG_TARGET, "Giving up on page {} of '{}', skipping it", self.page, self.endpoint);
        self.page += 1;
        self.failures = 0;
        self.consecutive_skips += 1;
        self.skipped += 1;

        if self.consecutive_skips >= policy.max_consecutive_skips {
            log::error!(target: LOG_TARGET, "Skipped {} pages in a row on '{}', stopping", self.consecutive_skips, self.endpoint);
            self.finished = true;
        }
    }

    /// Poll the `rate_limit` endpoint until quota is available again.
    ///
    /// Returns `false` if the endpoint itself cannot be read, in which case the page
    /// failure is handled like any other.
    async fn wait_for_quota(&mut self) -> bool {
        let interval = self.fetcher.policy().quota_poll_interval;
        let url = self.api.rate_limit();

        loop {
            let Some(status) = self.fetcher.fetch_json::<RateLimitStatus>(&url).await else {
                return false;
            };

            if status.resources.core.remaining > 0 {
                return true;
            }

            log::info!(
                target: LOG_TARGET,
                "Waiting for rate limit reset on '{}', checking again in {} minute(s)",
                self.endpoint,
                interval.as_secs() / 60
            );
            tokio::time::sleep(interval).await;
        }
    }

    /// Drain every remaining page into one list.
    pub async fn collect_all(mut self) -> Vec<T> {
        let mut all = Vec::new();
        while let Some(items) = self.next_page().await {
            all.extend(items);
        }
        all
    }
}
