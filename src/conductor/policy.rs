use crate::lease::Lease;
use std::time::Duration;
use time::OffsetDateTime;

const DEFAULT_FRACTION: f64 = 2.0 / 3.0;

/// When a lease becomes due for renewal.
///
/// A lease is due once `fraction` of its validity window has elapsed, i.e. when
/// its remaining lifetime drops to `window × (1 − fraction)` (the renewal
/// threshold). Between checks a member sleeps until the computed renewal point,
/// never less than `min_wait` and never more than `max_wait`; after waking the
/// wait is recomputed.
///
/// If `min_wait > max_wait`, they will be swapped. A `fraction` outside `(0, 1)`
/// falls back to the default of 2/3.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenewalPolicy {
    /// Elapsed share of the validity window after which renewal is attempted.
    pub fraction: f64,
    /// Shortest sleep between renewal checks.
    pub min_wait: Duration,
    /// Longest sleep between renewal checks.
    pub max_wait: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            fraction: DEFAULT_FRACTION,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(3600),
        }
    }
}

impl RenewalPolicy {
    pub(crate) fn normalize(mut self) -> Self {
        if !(self.fraction > 0.0 && self.fraction < 1.0) {
            self.fraction = DEFAULT_FRACTION;
        }
        if self.min_wait > self.max_wait {
            std::mem::swap(&mut self.min_wait, &mut self.max_wait);
        }
        self
    }

    /// Returns the remaining lifetime at or below which `lease` is due.
    pub fn threshold(&self, lease: &Lease) -> time::Duration {
        lease.window() * (1.0 - self.fraction)
    }

    /// Returns the instant at which `lease` becomes due.
    pub fn renew_at(&self, lease: &Lease) -> OffsetDateTime {
        lease.till() - self.threshold(lease)
    }

    /// Returns `true` if `lease` should be renewed at `now`.
    pub fn is_due(&self, lease: &Lease, now: OffsetDateTime) -> bool {
        lease.remaining(now) <= self.threshold(lease)
    }

    /// Returns how long to sleep before checking `lease` again.
    ///
    /// Zero means the lease is due now.
    pub fn next_check(&self, lease: &Lease, now: OffsetDateTime) -> Duration {
        if self.is_due(lease, now) {
            return Duration::ZERO;
        }
        let until = Duration::try_from(self.renew_at(lease) - now).unwrap_or(self.min_wait);
        until.clamp(self.min_wait, self.max_wait)
    }
}
