use super::builder::Settings;
use super::errors::MetricsErrorKind;
use super::metrics::MetricsRecorder;
use super::supervisor_common::{
    next_backoff, sleep_or_cancel, ErrorTracker, MAX_CONSECUTIVE_SAME_ERROR,
};
use crate::member::{CycleKind, Member, MemberError, MemberState};
use crate::prelude::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Drives one member until `cancel` fires.
///
/// The loop never polls: while `Active` it sleeps until the renewal point computed
/// from the current lease, while `Failed` it sleeps for the current backoff. Cycles
/// run strictly one at a time.
pub(super) async fn run_member(
    mut member: Member,
    settings: Arc<Settings>,
    cancel: CancellationToken,
) {
    let name = member.name().to_string();
    info!("Starting member loop: member={}", name);

    let mut backoff = settings.backoff.min_backoff;
    let mut error_tracker = ErrorTracker::new(MAX_CONSECUTIVE_SAME_ERROR);
    let metrics = settings.metrics.as_deref();

    loop {
        if cancel.is_cancelled() {
            debug!("Cancellation signal received; stopping member loop: member={}", name);
            return;
        }

        match member.state() {
            MemberState::Active => {
                let wait = member.until_renewal(&settings.policy, OffsetDateTime::now_utc());
                if wait.is_zero() {
                    debug!("Lease due for renewal: member={}", name);
                    member.begin_renewal();
                } else if sleep_or_cancel(&cancel, wait).await {
                    return;
                }
            }
            MemberState::Failed => {
                if let Some(m) = metrics {
                    m.record_retry(&name);
                }
                if sleep_or_cancel(&cancel, backoff).await {
                    return;
                }
                backoff = next_backoff(backoff, settings.backoff.max_backoff);
                member.begin_renewal();
            }
            MemberState::Uninitialized | MemberState::Renewing => {
                match member.cycle(&settings.timeouts, &cancel).await {
                    Ok(kind) => {
                        on_success(&name, kind, &mut error_tracker, metrics);
                        backoff = settings.backoff.min_backoff;
                    }
                    Err(MemberError::Cancelled) => {
                        debug!("Cycle abandoned on shutdown: member={}", name);
                        return;
                    }
                    Err(e) => on_error(&name, &e, backoff, &mut error_tracker, metrics),
                }
            }
        }
    }
}

fn on_success(
    name: &str,
    kind: CycleKind,
    error_tracker: &mut ErrorTracker,
    metrics: Option<&dyn MetricsRecorder>,
) {
    if error_tracker.consecutive_count() > 0 {
        info!(
            "Member recovered after {} consecutive failures: member={}",
            error_tracker.consecutive_count(),
            name
        );
    }
    error_tracker.reset();

    let Some(m) = metrics else {
        return;
    };
    match kind {
        CycleKind::Issued => m.record_issue(name),
        CycleKind::Renewed => m.record_renewal(name),
        CycleKind::Reissued => {
            m.record_error(name, MetricsErrorKind::RenewFallback);
            m.record_issue(name);
        }
        CycleKind::Reapplied => {}
    }
}

fn on_error(
    name: &str,
    error: &MemberError,
    backoff: Duration,
    error_tracker: &mut ErrorTracker,
    metrics: Option<&dyn MetricsRecorder>,
) {
    let Some(kind) = error.kind() else {
        return;
    };

    if error_tracker.record_error(kind) {
        warn!(
            "Cycle failed: member={}, kind={}, error={}, backoff_ms={}",
            name,
            kind,
            error,
            backoff.as_millis()
        );
    } else {
        debug!(
            "Cycle failed (repeated): member={}, kind={}, error={}, backoff_ms={}, consecutive_failures={}",
            name,
            kind,
            error,
            backoff.as_millis(),
            error_tracker.consecutive_count()
        );
    }

    if let Some(m) = metrics {
        m.record_error(name, kind);
    }
}
