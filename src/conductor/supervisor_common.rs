//! Backoff, cancellation and log-suppression helpers for member loops.

use super::errors::MetricsErrorKind;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Supervisor policy: maximum number of consecutive identical errors before suppressing WARN logs.
pub(crate) const MAX_CONSECUTIVE_SAME_ERROR: u32 = 3;

/// Helper for tracking repeated errors to suppress log noise.
///
/// For the first N consecutive occurrences of an error kind, logs are emitted at
/// WARN level. After that they are downgraded to DEBUG. A different kind resets
/// the counter.
#[derive(Debug)]
pub(crate) struct ErrorTracker {
    last_error_kind: Option<MetricsErrorKind>,
    consecutive_same_error: u32,
    max_consecutive: u32,
}

impl ErrorTracker {
    pub(crate) fn new(max_consecutive: u32) -> Self {
        Self {
            last_error_kind: None,
            consecutive_same_error: 0,
            max_consecutive,
        }
    }

    /// Records an occurrence of `error_kind`; returns `true` if it should be logged at WARN.
    pub(crate) fn record_error(&mut self, error_kind: MetricsErrorKind) -> bool {
        let should_warn = self.last_error_kind != Some(error_kind)
            || self.consecutive_same_error < self.max_consecutive;

        if self.last_error_kind == Some(error_kind) {
            self.consecutive_same_error += 1;
        } else {
            self.consecutive_same_error = 1;
            self.last_error_kind = Some(error_kind);
        }

        should_warn
    }

    pub(crate) fn reset(&mut self) {
        self.consecutive_same_error = 0;
        self.last_error_kind = None;
    }

    pub(crate) fn consecutive_count(&self) -> u32 {
        self.consecutive_same_error
    }
}

/// Sleeps for `dur` unless `token` is cancelled first. Returns `true` on cancellation.
pub(crate) async fn sleep_or_cancel(token: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        () = token.cancelled() => true,
        () = sleep(dur) => false,
    }
}

/// Exponential backoff with small jitter.
///
/// Doubles `current`, clamps to `max`, then adds 0-10% jitter (still clamped to
/// `max`) so that anchors sharing a degraded provider do not retry in lockstep.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    let cur = current.as_millis().min(u128::from(u64::MAX)) as u64;
    let max = max.as_millis().min(u128::from(u64::MAX)) as u64;

    let base = (cur.saturating_mul(2)).min(max);
    if base == 0 {
        return Duration::from_millis(0);
    }

    let jitter = base / 10;
    let add = if jitter > 0 {
        fastrand::u64(0..=jitter)
    } else {
        0
    };

    Duration::from_millis((base.saturating_add(add)).min(max))
}
