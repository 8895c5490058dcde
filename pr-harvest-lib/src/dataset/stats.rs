//! Tallies of what a harvest or listing run did with each pull request.

use super::pipeline::{RejectReason, UnitOutcome};
use core::fmt::{Display, Formatter};
use core::sync::atomic::{AtomicU64, Ordering};

/// Per-outcome counters for a [`HarvestPipeline`](super::HarvestPipeline) run.
#[derive(Debug, Default)]
pub struct HarvestStats {
    queued: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    invalid: AtomicU64,
    fetch_failed: AtomicU64,
    too_recent: AtomicU64,
    no_patch: AtomicU64,
    no_problem_statement: AtomicU64,
    emitted: AtomicU64,
    with_tests: AtomicU64,
    failed: AtomicU64,
}

/// A point-in-time copy of [`HarvestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestCounts {
    pub queued: u64,
    pub processed: u64,
    pub skipped: u64,
    pub invalid: u64,
    pub fetch_failed: u64,
    pub too_recent: u64,
    pub no_patch: u64,
    pub no_problem_statement: u64,
    pub emitted: u64,
    pub with_tests: u64,
    pub failed: u64,
}

fn bump(counter: &AtomicU64) {
    let _ = counter.fetch_add(1, Ordering::Relaxed);
}

impl HarvestStats {
    pub fn record_queued(&self) {
        bump(&self.queued);
    }

    /// Count a unit that ran to completion.
    pub fn record(&self, outcome: UnitOutcome) {
        bump(&self.processed);
        match outcome {
            UnitOutcome::Skipped => bump(&self.skipped),
            UnitOutcome::Rejected(reason) => bump(match reason {
                RejectReason::Invalid => &self.invalid,
                RejectReason::FetchFailed => &self.fetch_failed,
                RejectReason::TooRecent => &self.too_recent,
                RejectReason::NoPatch => &self.no_patch,
                RejectReason::NoProblemStatement => &self.no_problem_statement,
            }),
            UnitOutcome::Emitted { with_tests } => {
                bump(&self.emitted);
                if with_tests {
                    bump(&self.with_tests);
                }
            }
        }
    }

    /// Count a unit that errored, panicked, or could not be parsed.
    pub fn record_failure(&self) {
        bump(&self.processed);
        bump(&self.failed);
    }

    #[must_use]
    pub fn snapshot(&self) -> HarvestCounts {
        HarvestCounts {
            queued: self.queued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            fetch_failed: self.fetch_failed.load(Ordering::Relaxed),
            too_recent: self.too_recent.load(Ordering::Relaxed),
            no_patch: self.no_patch.load(Ordering::Relaxed),
            no_problem_statement: self.no_problem_statement.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            with_tests: self.with_tests.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl HarvestCounts {
    #[must_use]
    pub const fn rejected(&self) -> u64 {
        self.invalid + self.fetch_failed + self.too_recent + self.no_patch + self.no_problem_statement
    }
}

impl Display for HarvestCounts {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}/{} processed: {} emitted ({} with tests), {} skipped, {} rejected, {} failed",
            self.processed,
            self.queued,
            self.emitted,
            self.with_tests,
            self.skipped,
            self.rejected(),
            self.failed
        )
    }
}

/// Counters for a listing run.
#[derive(Debug, Default)]
pub struct ListingStats {
    listed: AtomicU64,
    already_present: AtomicU64,
    written: AtomicU64,
    linked: AtomicU64,
    failed: AtomicU64,
}

/// A point-in-time copy of [`ListingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListingCounts {
    pub listed: u64,
    pub already_present: u64,
    pub written: u64,
    pub linked: u64,
    pub failed: u64,
}

impl ListingStats {
    pub fn record_listed(&self, listed: u64, already_present: u64) {
        let _ = self.listed.fetch_add(listed, Ordering::Relaxed);
        let _ = self.already_present.fetch_add(already_present, Ordering::Relaxed);
    }

    /// Count a pull request written to the listing, linked to issues or not.
    pub fn record_written(&self, linked: bool) {
        bump(&self.written);
        if linked {
            bump(&self.linked);
        }
    }

    pub fn record_failure(&self) {
        bump(&self.failed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ListingCounts {
        ListingCounts {
            listed: self.listed.load(Ordering::Relaxed),
            already_present: self.already_present.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            linked: self.linked.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl Display for ListingCounts {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} listed, {} already present, {} written ({} linked to issues), {} failed",
            self.listed, self.already_present, self.written, self.linked, self.failed
        )
    }
}
