//! GitHub REST API vocabulary
//!
//! Endpoint construction, response header interpretation, and the minimal response
//! shapes the harvester deserializes.

use chrono::{DateTime, Utc};
use core::time::Duration;
use regex::Regex;
use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use serde::Deserialize;
use std::sync::LazyLock;

/// Public GitHub API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Media type for JSON resources.
pub const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";

/// Media type asking the pulls endpoint for the raw unified diff.
pub const DIFF_MEDIA_TYPE: &str = "application/vnd.github.diff";

static LAST_PAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"page=(\d+)>; rel="last""#).expect("valid regex"));

/// Builds endpoint URLs relative to a configurable API root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiUrls {
    base_url: String,
}

impl ApiUrls {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Listing of closed pull requests, without paging parameters.
    #[must_use]
    pub fn closed_pulls(&self, repo: &str) -> String {
        format!("{}/repos/{repo}/pulls?state=closed", self.base_url)
    }

    #[must_use]
    pub fn pull(&self, repo: &str, number: u64) -> String {
        format!("{}/repos/{repo}/pulls/{number}", self.base_url)
    }

    #[must_use]
    pub fn pull_commits(&self, repo: &str, number: u64) -> String {
        format!("{}/repos/{repo}/pulls/{number}/commits", self.base_url)
    }

    #[must_use]
    pub fn issue(&self, repo: &str, number: &str) -> String {
        format!("{}/repos/{repo}/issues/{number}", self.base_url)
    }

    #[must_use]
    pub fn issue_comments(&self, repo: &str, number: &str) -> String {
        format!("{}/repos/{repo}/issues/{number}/comments", self.base_url)
    }

    #[must_use]
    pub fn rate_limit(&self) -> String {
        format!("{}/rate_limit", self.base_url)
    }

    #[must_use]
    pub fn user(&self) -> String {
        format!("{}/user", self.base_url)
    }
}

/// Append paging parameters to a collection endpoint.
#[must_use]
pub fn paged(endpoint: &str, per_page: u32, page: u32) -> String {
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{sep}per_page={per_page}&page={page}")
}

impl Default for ApiUrls {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

/// Rate limit information from response headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: usize,
    pub reset_at: DateTime<Utc>,
}

/// Extract rate limit information from API response headers
#[must_use]
pub fn extract_rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?.parse::<usize>().ok()?;

    let reset_timestamp = headers.get("x-ratelimit-reset")?.to_str().ok()?.parse::<i64>().ok()?;

    let reset_at = DateTime::from_timestamp(reset_timestamp, 0)?;

    Some(RateLimitInfo { remaining, reset_at })
}

/// Remaining quota as advertised by the response, if the header is present.
#[must_use]
pub fn remaining_quota(headers: &HeaderMap) -> Option<usize> {
    headers.get("x-ratelimit-remaining")?.to_str().ok()?.trim().parse().ok()
}

/// Parse the `Retry-After` header given in delta-seconds.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

/// Raw `Link` header value.
#[must_use]
pub fn link_header(headers: &HeaderMap) -> Option<String> {
    headers.get(LINK)?.to_str().ok().map(ToString::to_string)
}

/// Page number advertised as `rel="last"` in a `Link` header.
#[must_use]
pub fn last_page_from_link(link: &str) -> Option<u32> {
    LAST_PAGE.captures(link)?.get(1)?.as_str().parse().ok()
}

/// Minimal GitHub issue info with only the fields we need
#[derive(Debug, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// One entry of an issue's comment list
#[derive(Debug, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub body: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of a pull request's commit list
#[derive(Debug, Deserialize)]
pub struct CommitEntry {
    pub commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetail {
    #[serde(default)]
    pub message: String,
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
pub struct CommitAuthor {
    pub date: DateTime<Utc>,
}

/// Body of the `rate_limit` endpoint
#[derive(Debug, Deserialize)]
pub struct RateLimitStatus {
    pub resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimitBucket,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitBucket {
    pub remaining: u64,
}
