//! One certificate anchor and its lifecycle.
//!
//! A [`Member`] binds a name, a [`Provider`], a [`Request`] and a [`LeaseHandle`].
//! Each [`Member::cycle`] obtains a lease (renewing the current one when possible,
//! otherwise issuing a fresh one), applies it, and records the outcome in the
//! member's [`MemberStatus`].
//!
//! ```text
//! Uninitialized ──cycle ok──▶ Active ──due──▶ Renewing ──cycle ok──▶ Active
//!        │                                       │
//!        └────────────cycle failed──▶ Failed ◀───┘
//!                                       │
//!                                       └──backoff──▶ Renewing
//! ```

mod status;

pub use status::{MemberStatus, StatusSnapshot};

use crate::conductor::{CallTimeouts, MetricsErrorKind, RenewalPolicy};
use crate::handle::{ApplyError, ApplyPhase, LeaseHandle};
use crate::lease::{DecodeError, Lease};
use crate::prelude::{debug, info};
use crate::provider::{Provider, ProviderError, Request};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a [`Member`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    /// No lease has been applied yet.
    Uninitialized,
    /// A lease is applied and not yet due for renewal.
    Active,
    /// The current lease is due and a new one is being obtained.
    Renewing,
    /// The latest cycle failed; a retry is scheduled.
    Failed,
}

impl MemberState {
    /// Returns a stable string representation of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Active => "active",
            Self::Renewing => "renewing",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collaborator call bounded by [`CallTimeouts`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallPhase {
    /// `Provider::issue` or `Provider::renew`.
    Provider,
    /// `LeaseHandle::apply`.
    Apply,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Provider => "provider",
            Self::Apply => "apply",
        })
    }
}

/// Errors produced by one [`Member::cycle`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MemberError {
    /// The provider failed to issue a lease.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The provider result could not be turned into a usable lease.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Applying the lease failed.
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// A collaborator call did not complete in time.
    #[error("{phase} call timed out after {after:?}")]
    Timeout {
        /// The call that timed out.
        phase: CallPhase,
        /// The timeout that was exceeded.
        after: Duration,
    },

    /// The conductor is shutting down.
    #[error("cancelled")]
    Cancelled,
}

impl MemberError {
    /// Returns the metrics label for this error, or `None` for cancellation.
    pub fn kind(&self) -> Option<MetricsErrorKind> {
        match self {
            Self::Provider(_) => Some(MetricsErrorKind::Provider),
            Self::Decode(_) => Some(MetricsErrorKind::Decode),
            Self::Apply(e) => Some(match e.phase() {
                ApplyPhase::Write => MetricsErrorKind::Write,
                ApplyPhase::Action => MetricsErrorKind::Action,
            }),
            Self::Timeout { .. } => Some(MetricsErrorKind::Timeout),
            Self::Cancelled => None,
        }
    }
}

/// How a successful [`Member::cycle`] obtained its lease.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleKind {
    /// A fresh lease was issued.
    Issued,
    /// The current lease was renewed by id.
    Renewed,
    /// Renewal failed and a fresh lease was issued instead.
    Reissued,
    /// A previously obtained lease that failed to apply was applied again.
    Reapplied,
}

/// One certificate anchor.
pub struct Member {
    name: String,
    provider: Arc<dyn Provider>,
    request: Request,
    handle: Box<dyn LeaseHandle>,
    lease: Option<Lease>,
    pending: Option<Lease>,
    state: MemberState,
    status: MemberStatus,
}

impl Member {
    /// Creates a member in the `Uninitialized` state.
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
        request: Request,
        handle: impl LeaseHandle,
    ) -> Self {
        let name = name.into();
        let status = MemberStatus::new(&name);
        Self {
            name,
            provider,
            request,
            handle: Box::new(handle),
            lease: None,
            pending: None,
            state: MemberState::Uninitialized,
            status,
        }
    }

    /// Returns the member name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the request this member asks its provider for.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the current state.
    pub fn state(&self) -> MemberState {
        self.state
    }

    /// Returns the lease currently applied, if any.
    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// Returns the live status of this member.
    pub fn status(&self) -> MemberStatus {
        self.status.clone()
    }

    /// Returns how long until the current lease is due, zero if it is due now
    /// or if there is no lease.
    pub fn until_renewal(&self, policy: &RenewalPolicy, now: OffsetDateTime) -> Duration {
        self.lease
            .as_ref()
            .map_or(Duration::ZERO, |lease| policy.next_check(lease, now))
    }

    /// Marks the member as renewing.
    pub fn begin_renewal(&mut self) {
        self.set_state(MemberState::Renewing);
    }

    /// Runs one issuance/renewal cycle and applies the result.
    ///
    /// A lease whose write failed is kept and re-applied by the next cycle while it
    /// is still valid. A lease whose follow-up action failed is kept as current:
    /// the member stays `Active` but reports the error.
    ///
    /// # Errors
    ///
    /// Returns the failure of this cycle. [`MemberError::Cancelled`] leaves the
    /// status untouched.
    pub async fn cycle(
        &mut self,
        timeouts: &CallTimeouts,
        cancel: &CancellationToken,
    ) -> Result<CycleKind, MemberError> {
        let now = OffsetDateTime::now_utc();
        let pending = self.pending.take().filter(|lease| lease.is_valid_at(now));

        let (lease, kind) = match pending {
            Some(lease) => {
                debug!(
                    "Re-applying pending lease: member={}, lease_id={}",
                    self.name,
                    lease.id()
                );
                (lease, CycleKind::Reapplied)
            }
            None => match self.acquire(timeouts, cancel).await {
                Ok(acquired) => acquired,
                Err(e) => return Err(self.fail(e)),
            },
        };

        let Some(response) = lease.response() else {
            return Err(self.fail(DecodeError::MissingResponse.into()));
        };

        let applied = bounded(
            CallPhase::Apply,
            timeouts.apply,
            cancel,
            self.handle.apply(response),
        )
        .await;

        match applied {
            Ok(Ok(())) => {
                info!(
                    "Lease applied: member={}, lease_id={}, till={}",
                    self.name,
                    lease.id(),
                    lease.till()
                );
                self.status.record_applied(&lease);
                self.state = MemberState::Active;
                self.lease = Some(lease);
                Ok(kind)
            }
            Ok(Err(e)) if e.is_applied() => {
                self.status.record_applied_with_error(&lease, &e);
                self.state = MemberState::Active;
                self.lease = Some(lease);
                Err(e.into())
            }
            Ok(Err(e)) => {
                self.pending = Some(lease);
                Err(self.fail(e.into()))
            }
            Err(e) => {
                // Writes are idempotent, so an interrupted apply is simply retried.
                self.pending = Some(lease);
                Err(self.fail(e))
            }
        }
    }

    async fn acquire(
        &self,
        timeouts: &CallTimeouts,
        cancel: &CancellationToken,
    ) -> Result<(Lease, CycleKind), MemberError> {
        let mut kind = CycleKind::Issued;
        let now = OffsetDateTime::now_utc();

        if let Some(current) = self
            .lease
            .as_ref()
            .filter(|lease| lease.is_renewable() && lease.is_valid_at(now))
        {
            match self.renew(current, timeouts, cancel).await {
                Ok(lease) => return Ok((lease, CycleKind::Renewed)),
                Err(MemberError::Cancelled) => return Err(MemberError::Cancelled),
                Err(e) => {
                    debug!(
                        "Renewal failed; issuing a new lease: member={}, lease_id={}, error={}",
                        self.name,
                        current.id(),
                        e
                    );
                    kind = CycleKind::Reissued;
                }
            }
        }

        let issued = bounded(
            CallPhase::Provider,
            timeouts.provider,
            cancel,
            self.provider.issue(&self.request),
        )
        .await??;
        Ok((Lease::from_issuance(self.request.clone(), issued)?, kind))
    }

    async fn renew(
        &self,
        current: &Lease,
        timeouts: &CallTimeouts,
        cancel: &CancellationToken,
    ) -> Result<Lease, MemberError> {
        let issued = bounded(
            CallPhase::Provider,
            timeouts.provider,
            cancel,
            self.provider.renew(current),
        )
        .await??;
        let lease = Lease::from_issuance(self.request.clone(), issued)?;
        // A renewal that extends the lease without new material cannot be applied.
        if !lease.has_response() {
            return Err(DecodeError::MissingResponse.into());
        }
        Ok(lease)
    }

    fn fail(&mut self, error: MemberError) -> MemberError {
        if !matches!(error, MemberError::Cancelled) {
            self.state = MemberState::Failed;
            self.status.record_failure(&error);
        }
        error
    }

    fn set_state(&mut self, state: MemberState) {
        self.state = state;
        self.status.record_state(state);
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name)
            .field("provider", &"<Provider>")
            .field("request", &self.request)
            .field("handle", &"<LeaseHandle>")
            .field("lease", &self.lease)
            .field("pending", &self.pending)
            .field("state", &self.state)
            .finish()
    }
}

/// Runs `fut` bounded by `after`, abandoning it if `cancel` fires.
async fn bounded<F: Future>(
    phase: CallPhase,
    after: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, MemberError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(MemberError::Cancelled),
        res = tokio::time::timeout(after, fut) => {
            res.map_err(|_| MemberError::Timeout { phase, after })
        }
    }
}
