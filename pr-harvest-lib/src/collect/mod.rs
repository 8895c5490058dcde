//! Rate-limit aware access to the hosting REST API
//!
//! Everything that touches the network lives here. Requests go through a narrow
//! [`Transport`] seam, which the [`ResilientFetcher`] wraps in status-driven retries.
//! Each concurrent unit of work owns an [`IdentityRotator`] that decides which proxy
//! session the next request leaves through, so units never contend over identity state.
//!
//! # Implementation Model
//!
//! - [`ResilientFetcher`] consults a pure [`RetryPolicy`] after every failed attempt.
//!   Exhausted retries produce a [`Fetched`] without a body rather than an error.
//! - [`Paginator`] walks a collection lazily, page by page, on top of a fetcher.
//! - [`ParallelPageCache`] sizes a pull-request listing from its first page and fetches
//!   the remaining pages concurrently into a resumable [`PageCache`].
//! - [`QuotaGate`] bounds how many units run at once and lets a unit that finds the quota
//!   exhausted place a [`QuotaHold`] on new work until it resets.
//! - [`FetchStats`] counts requests, retries, and rotations across a whole run.

mod client;
mod fetcher;
mod identity;
mod page_cache;
mod paginator;
mod path_utils;
mod progress;
mod quota_gate;
mod stats;
mod transport;

pub use client::{ApiUrls, Comment, CommitEntry, DEFAULT_API_URL, DIFF_MEDIA_TYPE, Issue, JSON_MEDIA_TYPE};
pub use fetcher::{Fetched, ResilientFetcher, RetryPlan, RetryPolicy, StatusClass};
pub use identity::{Identity, IdentityRotator, ProxyConfig};
pub use page_cache::{DEFAULT_PAGE_WORKERS, DEFAULT_PER_PAGE, PageCache, ParallelPageCache};
pub use paginator::Paginator;
pub use path_utils::{ledger_path, sanitize_path_component, superset_path};
pub use progress::Progress;
pub use quota_gate::{QuotaGate, QuotaHold};
pub use stats::{FetchCounts, FetchStats};
pub use transport::{HttpTransport, RawResponse, Transport};

#[cfg(test)]
pub(crate) use transport::scripted;
