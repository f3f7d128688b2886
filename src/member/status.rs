use super::MemberState;
use crate::health::HealthCheck;
use crate::lease::Lease;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

/// Point-in-time view of one member's health.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Member name.
    pub name: String,
    /// `true` once the latest cycle fully succeeded.
    pub healthy: bool,
    /// Current state of the member.
    pub state: MemberState,
    /// Error recorded by the latest failed cycle, cleared on success.
    pub last_error: Option<String>,
    /// When this snapshot was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    /// Expiry of the lease currently applied, if any.
    #[serde(with = "time::serde::rfc3339::option")]
    pub lease_expires: Option<OffsetDateTime>,
    /// Serial of the certificate currently applied, if any.
    pub serial: Option<String>,
}

/// Live health status of one member.
///
/// Cloning is cheap; every clone observes the same status. Only the member's own
/// loop writes it, and readers always see a complete snapshot.
#[derive(Clone)]
pub struct MemberStatus {
    inner: Arc<ArcSwap<StatusSnapshot>>,
}

impl MemberStatus {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(StatusSnapshot {
                name: name.to_string(),
                healthy: false,
                state: MemberState::Uninitialized,
                last_error: None,
                last_updated: OffsetDateTime::now_utc(),
                lease_expires: None,
                serial: None,
            })),
        }
    }

    /// Returns the member name.
    pub fn name(&self) -> String {
        self.inner.load().name.clone()
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.inner.load_full()
    }

    /// Returns `true` if the latest cycle fully succeeded.
    pub fn is_healthy(&self) -> bool {
        self.inner.load().healthy
    }

    /// Returns the error recorded by the latest failed cycle.
    pub fn last_error(&self) -> Option<String> {
        self.inner.load().last_error.clone()
    }

    /// Health check in the form expected by health-reporting surfaces.
    ///
    /// # Errors
    ///
    /// Returns the recorded error, or a placeholder message if the member has not
    /// applied a lease yet.
    pub fn check(&self) -> Result<(), String> {
        let snapshot = self.inner.load();
        if snapshot.healthy {
            return Ok(());
        }
        Err(snapshot
            .last_error
            .clone()
            .unwrap_or_else(|| format!("{}: no lease applied yet", snapshot.name)))
    }

    /// Returns [`MemberStatus::check`] as a shareable callback.
    pub fn health_check(&self) -> HealthCheck {
        let status = self.clone();
        Arc::new(move || status.check())
    }

    pub(crate) fn record_applied(&self, lease: &Lease) {
        self.update(|s| {
            s.healthy = true;
            s.state = MemberState::Active;
            s.last_error = None;
            set_lease(s, lease);
        });
    }

    /// The lease was applied but its follow-up step failed.
    pub(crate) fn record_applied_with_error(&self, lease: &Lease, error: &dyn fmt::Display) {
        self.update(|s| {
            s.healthy = false;
            s.state = MemberState::Active;
            s.last_error = Some(error.to_string());
            set_lease(s, lease);
        });
    }

    pub(crate) fn record_failure(&self, error: &dyn fmt::Display) {
        self.update(|s| {
            s.healthy = false;
            s.state = MemberState::Failed;
            s.last_error = Some(error.to_string());
        });
    }

    /// Records a state change, keeping health untouched.
    pub(crate) fn record_state(&self, state: MemberState) {
        self.update(|s| s.state = state);
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        let mut next = StatusSnapshot::clone(&self.inner.load());
        f(&mut next);
        next.last_updated = OffsetDateTime::now_utc();
        self.inner.store(Arc::new(next));
    }
}

fn set_lease(snapshot: &mut StatusSnapshot, lease: &Lease) {
    snapshot.lease_expires = Some(lease.till());
    snapshot.serial = lease.response().map(|r| r.serial().to_string());
}

impl fmt::Debug for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemberStatus")
            .field(&*self.inner.load())
            .finish()
    }
}
