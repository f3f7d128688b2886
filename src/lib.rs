#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

//! Keeps local TLS certificate/key pairs ("anchors") continuously valid.
//!
//! Each anchor is a [`Member`]: it obtains a [`Lease`] from a [`Provider`], persists
//! the issued material through a [`LeaseHandle`] (a destination plus a follow-up
//! action such as reloading a service) and renews it well before it expires. A
//! [`Conductor`] runs one independent loop per member and exposes their health.
//!
//! # Examples
//!
//! ```no_run
//! use disttrust::conductor::Conductor;
//! use disttrust::handle::{CommandAction, DefaultLeaseHandle, FileDestination};
//! use disttrust::member::Member;
//! use disttrust::provider::{Provider, Request};
//! use std::sync::Arc;
//!
//! # async fn example(provider: Arc<dyn Provider>) -> Result<(), Box<dyn std::error::Error>> {
//! let handle = DefaultLeaseHandle::new(
//!     Arc::new(FileDestination::new("/etc/tls/web.crt", "/etc/tls/web.key")),
//!     Arc::new(CommandAction::new("systemctl", ["reload", "nginx"])),
//! );
//! let member = Member::new(
//!     "web",
//!     provider,
//!     Request::new("web.example.org", ["www.example.org"]),
//!     handle,
//! );
//!
//! let mut conductor = Conductor::new();
//! let status = conductor.add_member(member);
//!
//! // Expose `status.health_check()` on a health endpoint, then run until SIGTERM.
//! conductor.play().watch().await?;
//! # let _ = status;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `logging` (default): emit records through the `log` crate.
//! - `tracing`: emit events through `tracing` instead.

pub mod conductor;
pub mod config;
pub mod handle;
pub mod health;
pub mod lease;
pub mod member;
pub mod provider;

mod observability;
mod prelude;

pub use conductor::{Conductor, ConductorBuilder, ConductorError, RenewalPolicy};
pub use config::{Config, ConfigError};
pub use handle::{DefaultLeaseHandle, LeaseHandle};
pub use health::{HealthCheck, HealthReport};
pub use lease::{DecodeError, Lease};
pub use member::{Member, MemberError, MemberState, MemberStatus};
pub use provider::{Provider, ProviderError, ProviderStore, Request, Response};
