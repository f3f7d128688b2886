use std::fmt;
use thiserror::Error;

/// Errors returned by [`Conductor`](super::Conductor) lifecycle operations.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConductorError {
    /// The conductor was already shut down.
    #[error("conductor is closed")]
    Closed,

    /// Member loops did not finish within the shutdown grace period and were aborted.
    #[error("shutdown timeout exceeded; {aborted} member loop(s) aborted")]
    ShutdownTimeout {
        /// Number of loops that had to be aborted.
        aborted: usize,
    },
}

/// Error kinds for structured metrics reporting.
///
/// Use these stable, low-cardinality labels when recording metrics.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum MetricsErrorKind {
    /// Issuance or renewal was refused or failed at the provider.
    Provider,
    /// The provider result could not be turned into a lease.
    Decode,
    /// The destination failed to persist material.
    Write,
    /// The post-write action failed.
    Action,
    /// A collaborator call exceeded its timeout.
    Timeout,
    /// A renewal attempt failed and fell back to a fresh issuance.
    RenewFallback,
    /// Failed to join a member loop during shutdown.
    SupervisorJoinFailed,
}

impl MetricsErrorKind {
    /// Returns a string representation of the error kind.
    ///
    /// This is useful for metrics systems that require string labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Decode => "decode",
            Self::Write => "write",
            Self::Action => "action",
            Self::Timeout => "timeout",
            Self::RenewFallback => "renew_fallback",
            Self::SupervisorJoinFailed => "supervisor_join_failed",
        }
    }
}

impl fmt::Display for MetricsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
