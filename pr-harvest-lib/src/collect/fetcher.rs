//! Status-driven retries with identity rotation.
//!
//! [`ResilientFetcher`] owns one unit's [`IdentityRotator`] and wraps every request in a
//! bounded retry loop. What happens between attempts is decided by [`RetryPolicy`],
//! a pure function of the response class, the attempt number, and whether another
//! identity is available. Exhausting the attempts is not an error: the caller gets a
//! [`Fetched`] without a body and decides what a missing resource means.

use super::client::{JSON_MEDIA_TYPE, RateLimitInfo};
use super::identity::IdentityRotator;
use super::stats::FetchStats;
use super::quota_gate::QuotaGate;
use super::transport::{RawResponse, Transport};
use chrono::{DateTime, Utc};
use core::time::Duration;
use serde::de::DeserializeOwned;
use std::sync::Arc;

const LOG_TARGET: &str = "     fetch";

/// How a single HTTP outcome is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 200: the body is the answer.
    Ok,

    /// 404: the resource does not exist, retrying will not help.
    NotFound,

    /// 403 with no quota left (or no quota header at all).
    RateLimited,

    /// 429: secondary rate limit.
    SecondaryRateLimited,

    /// 502/503, and transport failures.
    ServerError,

    /// Anything else, including 403 with quota remaining.
    Other,
}

impl StatusClass {
    #[must_use]
    pub fn classify(resp: &RawResponse) -> Self {
        match resp.status {
            200 => Self::Ok,
            404 => Self::NotFound,
            403 => match resp.remaining_quota() {
                Some(0) | None => Self::RateLimited,
                Some(_) => Self::Other,
            },
            429 => Self::SecondaryRateLimited,
            502 | 503 => Self::ServerError,
            _ => Self::Other,
        }
    }
}

/// What to do before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    pub delay: Duration,
    pub rotate: bool,

    /// Set when the delay waits out the shared quota, which resets at this time.
    pub quota_reset: Option<DateTime<Utc>>,
}

/// Timing and bounds of the retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per fetch, including the first one.
    pub max_attempts: u32,

    /// Pause after rotating away from an exhausted quota.
    pub quota_rotate_delay: Duration,

    /// Pause after rotating away from a secondary rate limit.
    pub secondary_rotate_delay: Duration,

    /// Used when a 429 carries no `Retry-After`.
    pub default_retry_after: Duration,

    /// Used when an exhausted quota carries no reset time.
    pub default_quota_reset: Duration,

    /// Linear backoff step, multiplied by the attempt number.
    pub backoff_step: Duration,

    /// Ceiling for the linear backoff.
    pub backoff_cap: Duration,

    /// Ceiling for sleeping until a quota reset.
    pub max_quota_wait: Duration,

    /// Extra retries granted to a failed page before it is skipped.
    pub page_retries: u32,

    /// Consecutive skipped pages after which pagination gives up.
    pub max_consecutive_skips: u32,

    /// Interval between `rate_limit` polls while waiting out an exhausted quota.
    pub quota_poll_interval: Duration,

    /// Attempts per page in the parallel page fetcher.
    pub page_attempts: u32,

    /// Pause between attempts in the parallel page fetcher.
    pub page_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            quota_rotate_delay: Duration::from_secs(1),
            secondary_rotate_delay: Duration::from_secs(2),
            default_retry_after: Duration::from_secs(60),
            default_quota_reset: Duration::from_secs(60),
            backoff_step: Duration::from_secs(3),
            backoff_cap: Duration::from_secs(15),
            max_quota_wait: Duration::from_secs(3600),
            page_retries: 3,
            max_consecutive_skips: 3,
            quota_poll_interval: Duration::from_secs(5 * 60),
            page_attempts: 3,
            page_retry_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Same bounds as the default policy, with every pause set to zero.
    #[must_use]
    pub fn no_delay() -> Self {
        Self {
            quota_rotate_delay: Duration::ZERO,
            secondary_rotate_delay: Duration::ZERO,
            default_retry_after: Duration::ZERO,
            default_quota_reset: Duration::ZERO,
            backoff_step: Duration::ZERO,
            backoff_cap: Duration::ZERO,
            max_quota_wait: Duration::ZERO,
            quota_poll_interval: Duration::ZERO,
            page_retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// `min(step * attempt, cap)` for a 1-based attempt number.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt).min(self.backoff_cap)
    }

    /// Decide how to proceed after a failed attempt.
    ///
    /// `response` is `None` when the request failed below HTTP. Returns `None` for
    /// outcomes that must not be retried.
    #[must_use]
    pub fn plan(&self, class: StatusClass, response: Option<&RawResponse>, attempt: u32, can_rotate: bool, now: DateTime<Utc>) -> Option<RetryPlan> {
        let plan = match class {
            StatusClass::Ok | StatusClass::NotFound => return None,

            StatusClass::RateLimited if can_rotate => RetryPlan {
                delay: self.quota_rotate_delay,
                rotate: true,
                quota_reset: None,
            },

            StatusClass::RateLimited => {
                let reset_at = response
                    .and_then(RawResponse::rate_limit)
                    .map_or_else(
                        || now + chrono::Duration::from_std(self.default_quota_reset).unwrap_or(chrono::Duration::zero()),
                        |rl| rl.reset_at,
                    );
                let wait = (reset_at - now).to_std().unwrap_or(Duration::ZERO) + Duration::from_secs(1);

                RetryPlan {
                    delay: wait.min(self.max_quota_wait),
                    rotate: false,
                    quota_reset: Some(reset_at),
                }
            }

            StatusClass::SecondaryRateLimited if can_rotate => RetryPlan {
                delay: self.secondary_rotate_delay,
                rotate: true,
                quota_reset: None,
            },

            StatusClass::SecondaryRateLimited => RetryPlan {
                delay: response.and_then(RawResponse::retry_after).unwrap_or(self.default_retry_after),
                rotate: false,
                quota_reset: None,
            },

            StatusClass::ServerError => RetryPlan {
                delay: self.backoff(attempt),
                rotate: can_rotate,
                quota_reset: None,
            },

            StatusClass::Other => RetryPlan {
                delay: self.backoff(attempt),
                rotate: false,
                quota_reset: None,
            },
        };

        Some(plan)
    }
}

/// The outcome of a fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Class of the last attempt.
    pub status: StatusClass,

    /// Present only on success.
    pub body: Option<String>,

    pub link: Option<String>,
    pub rate_limit: Option<RateLimitInfo>,
    pub attempts: u32,
}

impl Fetched {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.body.is_some()
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status, StatusClass::NotFound)
    }
}

/// Performs requests for one unit of work.
#[derive(Debug)]
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    rotator: IdentityRotator,
    policy: RetryPolicy,
    stats: Arc<FetchStats>,
    gate: Option<Arc<QuotaGate>>,
}

impl ResilientFetcher {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, rotator: IdentityRotator, policy: RetryPolicy) -> Self {
        Self {
            transport,
            rotator,
            policy,
            stats: Arc::default(),
            gate: None,
        }
    }

    /// Report into shared counters instead of private ones.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<FetchStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Hold back sibling units through `gate` while waiting for a quota reset.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<QuotaGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn rotator(&self) -> &IdentityRotator {
        &self.rotator
    }

    pub const fn rotator_mut(&mut self) -> &mut IdentityRotator {
        &mut self.rotator
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<FetchStats> {
        &self.stats
    }

    /// Fetch `url`, retrying according to the policy.
    pub async fn fetch(&mut self, url: &str, accept: &str) -> Fetched {
        let mut last_status = StatusClass::Other;
        let mut last_rate_limit = None;
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            self.rotator.record_request();
            let identity = self.rotator.current_identity();
            self.stats.record_request();

            let (class, response) = match self.transport.get(url, accept, identity.as_ref()).await {
                Ok(resp) => (StatusClass::classify(&resp), Some(resp)),
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "Network error on '{url}' (attempt {attempt}/{max_attempts}): {e:#}");
                    (StatusClass::ServerError, None)
                }
            };

            if let Some(resp) = &response {
                last_rate_limit = resp.rate_limit().or(last_rate_limit);
            }

            match (class, response) {
                (StatusClass::Ok, Some(resp)) => {
                    let link = resp.link();
                    return Fetched {
                        status: StatusClass::Ok,
                        body: Some(resp.body),
                        link,
                        rate_limit: last_rate_limit,
                        attempts: attempt,
                    };
                }

                (StatusClass::NotFound, _) => {
                    self.stats.record_not_found();
                    log::info!(target: LOG_TARGET, "Resource not found: {url}");
                    return Fetched {
                        status: StatusClass::NotFound,
                        body: None,
                        link: None,
                        rate_limit: last_rate_limit,
                        attempts: attempt,
                    };
                }

                (class, response) => {
                    last_status = class;
                    if attempt == max_attempts {
                        break;
                    }

                    let Some(plan) = self.policy.plan(class, response.as_ref(), attempt, self.rotator.is_enabled(), Utc::now()) else {
                        break;
                    };

                    self.stats.record_retry();
                    if plan.rotate {
                        self.rotator.force_rotate();
                        self.stats.record_rotation();
                    }

                    let status = response.as_ref().map_or_else(|| "network error".to_string(), |r| r.status.to_string());
                    if let Some(reset_at) = plan.quota_reset {
                        log::warn!(target: LOG_TARGET, "Rate limit exceeded on '{url}', waiting {}s for the quota to reset", plan.delay.as_secs());
                        if let Some(gate) = &self.gate {
                            let _ = gate.hold_until_reset(reset_at, plan.delay);
                        }
                    } else {
                        log::debug!(
                            target: LOG_TARGET,
                            "{status} on '{url}', retrying in {}s (attempt {attempt}/{max_attempts}, rotate: {})",
                            plan.delay.as_secs(),
                            plan.rotate
                        );
                    }

                    tokio::time::sleep(plan.delay).await;
                }
            }
        }

        self.stats.record_exhausted();
        log::error!(target: LOG_TARGET, "Could not fetch '{url}' after {max_attempts} attempt(s)");

        Fetched {
            status: last_status,
            body: None,
            link: None,
            rate_limit: last_rate_limit,
            attempts: max_attempts,
        }
    }

    /// Fetch and deserialize a JSON resource. Absent, exhausted, and malformed
    /// resources all yield `None`.
    pub async fn fetch_json<T: DeserializeOwned>(&mut self, url: &str) -> Option<T> {
        let body = self.fetch(url, JSON_MEDIA_TYPE).await.body?;
        match serde_json::from_str(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!(target: LOG_TARGET, "Could not parse JSON from '{url}': {e}");
                None
            }
        }
    }
}
