//! Concurrent supervision of members.
//!
//! [`Conductor`] spawns one Tokio task per [`Member`](crate::member::Member). Each
//! task sleeps until its lease is due (see [`RenewalPolicy`]), runs a cycle, and on
//! failure retries with jittered exponential backoff (see [`BackoffConfig`]).
//! Members share nothing but their read-only providers: a member that keeps
//! failing only degrades its own status.
//!
//! Every provider and apply call is bounded by [`CallTimeouts`] and abandoned on
//! shutdown.

mod builder;
mod errors;
mod metrics;
mod policy;
mod runtime;
mod supervisor;
mod supervisor_common;

pub use builder::{BackoffConfig, CallTimeouts, ConductorBuilder};
pub use errors::{ConductorError, MetricsErrorKind};
pub use metrics::MetricsRecorder;
pub use policy::RenewalPolicy;
pub use runtime::Conductor;
