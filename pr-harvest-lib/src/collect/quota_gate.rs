use chrono::{DateTime, Utc};
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::time::Instant;

const LOG_TARGET: &str = "     quota";

/// A hold placed on new work because the shared API quota ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaHold {
    /// When the API said the quota resets.
    pub reset_at: DateTime<Utc>,

    /// When dispatch resumes, which may be earlier than `reset_at` when the wait was capped.
    pub until: Instant,
}

impl QuotaHold {
    /// Short status line for progress output.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("waiting for quota reset at {}", self.reset_at.format("%H:%M:%S UTC"))
    }
}

/// Admission control for units that share one API quota.
///
/// At most `max_units` units hold a slot at a time. A unit that finds the quota exhausted
/// with no other identity to switch to places a [`QuotaHold`]; until it lapses, no further
/// slots are handed out while units already running carry on.
#[derive(Debug)]
pub struct QuotaGate {
    slots: Arc<Semaphore>,
    hold: watch::Sender<Option<QuotaHold>>,
}

impl QuotaGate {
    /// A hold ending less than this after the current one does not replace it.
    const MIN_EXTENSION: Duration = Duration::from_secs(1);

    #[must_use]
    pub fn new(max_units: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: Arc::new(Semaphore::new(max_units.max(1))),
            hold: watch::Sender::new(None),
        })
    }

    /// Wait until no hold is in effect, then take a slot, released when the permit drops.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // A hold placed while sleeping is picked up on the next pass.
        while let Some(hold) = self.hold() {
            tokio::time::sleep_until(hold.until).await;
        }

        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .expect("slots are never closed")
    }

    /// The hold currently in effect. Lapsed holds read as `None`.
    #[must_use]
    pub fn hold(&self) -> Option<QuotaHold> {
        let now = Instant::now();
        let current = *self.hold.borrow();
        current.filter(|hold| hold.until > now)
    }

    /// Hold back new units until the quota resets at `reset_at`, but for no longer than `wait`.
    ///
    /// Returns `true` when the hold was placed or pushed later, and `false` when a hold
    /// ending at about the same time or later is already in place.
    pub fn hold_until_reset(&self, reset_at: DateTime<Utc>, wait: Duration) -> bool {
        let until = Instant::now() + wait;
        let placed = self.hold.send_if_modified(|current| {
            if current.is_some_and(|hold| hold.until + Self::MIN_EXTENSION >= until) {
                return false;
            }

            *current = Some(QuotaHold { reset_at, until });
            true
        });

        if placed {
            log::info!(target: LOG_TARGET, "Quota exhausted, holding new work for {}s (reset at {reset_at})", wait.as_secs());
        }

        placed
    }
}
