//! Request accounting shared by all fetchers of a run.

use core::fmt::{Display, Formatter};
use core::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by every [`ResilientFetcher`](super::ResilientFetcher) that shares them.
#[derive(Debug, Default)]
pub struct FetchStats {
    requests: AtomicU64,
    retries: AtomicU64,
    rotations: AtomicU64,
    not_found: AtomicU64,
    exhausted: AtomicU64,
}

/// A point-in-time copy of [`FetchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchCounts {
    pub requests: u64,
    pub retries: u64,
    pub rotations: u64,
    pub not_found: u64,
    pub exhausted: u64,
}

impl FetchStats {
    pub fn record_request(&self) {
        let _ = self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        let _ = self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation(&self) {
        let _ = self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_found(&self) {
        let _ = self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        let _ = self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> FetchCounts {
        FetchCounts {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

impl Display for FetchCounts {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} request(s), {} retried, {} rotation(s), {} not found, {} gave up",
            self.requests, self.retries, self.rotations, self.not_found, self.exhausted
        )
    }
}
