//! Persisting issued material and reacting to it.
//!
//! A [`Destination`] stores a [`Response`]; an [`Action`] runs afterwards (for
//! example to reload a service). A [`LeaseHandle`] composes both into the single
//! step a member performs after every issuance or renewal.

mod command;
mod file;

pub use command::{CommandAction, NoopAction};
pub use file::{FileDestination, FileDestinationOptions};

use crate::prelude::debug;
use crate::provider::Response;
use futures::future::BoxFuture;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Future returned by [`Destination::write`].
pub type WriteFuture<'a> = BoxFuture<'a, Result<(), WriteError>>;

/// Future returned by [`Action::run`].
pub type ActionFuture<'a> = BoxFuture<'a, Result<(), ActionError>>;

/// Future returned by [`LeaseHandle::apply`].
pub type ApplyFuture<'a> = BoxFuture<'a, Result<(), ApplyError>>;

/// Errors returned by [`Destination`] implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteError {
    /// A filesystem operation failed.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        /// The path being written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The write did not complete in time.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// Any other destination failure.
    #[error("destination error: {0}")]
    Other(String),
}

/// Errors returned by [`Action`] implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ActionError {
    /// The command could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The command exited unsuccessfully.
    #[error("{program} exited with {}", describe_exit(.code))]
    Failed {
        /// The program that failed.
        program: String,
        /// Exit code, `None` if terminated by a signal.
        code: Option<i32>,
    },

    /// The action did not complete in time.
    #[error("action timed out after {0:?}")]
    Timeout(Duration),

    /// Any other action failure.
    #[error("action error: {0}")]
    Other(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
}

/// The step of [`LeaseHandle::apply`] that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    /// Persisting the material.
    Write,
    /// Running the post-write action.
    Action,
}

impl ApplyPhase {
    /// Returns a stable string representation of the phase.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`LeaseHandle::apply`].
///
/// A [`ApplyError::Write`] means nothing was applied. An [`ApplyError::Action`]
/// means the material is already durable and only the side effect failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApplyError {
    /// The destination failed; the action was not run.
    #[error("write phase failed: {0}")]
    Write(#[source] WriteError),

    /// The destination succeeded but the action failed.
    #[error("action phase failed: {0}")]
    Action(#[source] ActionError),
}

impl ApplyError {
    /// Returns the phase that failed.
    pub fn phase(&self) -> ApplyPhase {
        match self {
            Self::Write(_) => ApplyPhase::Write,
            Self::Action(_) => ApplyPhase::Action,
        }
    }

    /// Returns `true` if the material was persisted despite the error.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Action(_))
    }
}

/// Where issued material is persisted.
///
/// Writes must be idempotent: writing the same response twice leaves the same state.
pub trait Destination: Send + Sync + 'static {
    /// Persists `response`.
    fn write<'a>(&'a self, response: &'a Response) -> WriteFuture<'a>;
}

/// Side effect run after material has been persisted.
pub trait Action: Send + Sync + 'static {
    /// Runs the side effect.
    fn run(&self) -> ActionFuture<'_>;
}

/// Applies one lease's response as a single recoverable step.
pub trait LeaseHandle: Send + Sync + 'static {
    /// Persists `response` and runs the follow-up side effect.
    fn apply<'a>(&'a self, response: &'a Response) -> ApplyFuture<'a>;
}

/// Default phase timeouts for [`DefaultLeaseHandle`].
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(60);

/// [`LeaseHandle`] that writes to a [`Destination`] and then runs an [`Action`].
///
/// The action only runs after a successful write. Each phase is bounded by its own
/// timeout.
#[derive(Clone)]
pub struct DefaultLeaseHandle {
    destination: Arc<dyn Destination>,
    action: Arc<dyn Action>,
    write_timeout: Duration,
    action_timeout: Duration,
}

impl DefaultLeaseHandle {
    /// Composes `destination` and `action`.
    pub fn new(destination: Arc<dyn Destination>, action: Arc<dyn Action>) -> Self {
        Self {
            destination,
            action,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    /// Sets the write and action phase timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, write: Duration, action: Duration) -> Self {
        self.write_timeout = write;
        self.action_timeout = action;
        self
    }
}

impl fmt::Debug for DefaultLeaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultLeaseHandle")
            .field("destination", &"<Destination>")
            .field("action", &"<Action>")
            .field("write_timeout", &self.write_timeout)
            .field("action_timeout", &self.action_timeout)
            .finish()
    }
}

impl LeaseHandle for DefaultLeaseHandle {
    fn apply<'a>(&'a self, response: &'a Response) -> ApplyFuture<'a> {
        Box::pin(async move {
            tokio::time::timeout(self.write_timeout, self.destination.write(response))
                .await
                .map_err(|_| WriteError::Timeout(self.write_timeout))
                .and_then(|r| r)
                .map_err(ApplyError::Write)?;

            debug!("Lease material written: serial={}", response.serial());

            tokio::time::timeout(self.action_timeout, self.action.run())
                .await
                .map_err(|_| ActionError::Timeout(self.action_timeout))
                .and_then(|r| r)
                .map_err(ApplyError::Action)
        })
    }
}
