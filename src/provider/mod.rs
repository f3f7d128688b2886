//! Credential providers and the values exchanged with them.
//!
//! A [`Provider`] turns a [`Request`] into an [`Issued`] result. The core never
//! implements providers itself; concrete backends are supplied by the embedding
//! process and registered in a [`ProviderStore`].

mod store;

pub use store::{ProviderStore, StoreError};

use crate::lease::Lease;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroize;

/// Future returned by [`Provider`] calls.
pub type ProviderFuture<'a> = BoxFuture<'a, Result<Issued, ProviderError>>;

/// What is being asked of a provider: the identity of one certificate.
///
/// Two equal requests may be served the same logical certificate by a provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct Request {
    common_name: String,
    #[serde(default)]
    alt_names: Vec<String>,
}

impl Request {
    /// Creates a request for `common_name` with the given subject alternative names.
    pub fn new<I, S>(common_name: impl Into<String>, alt_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            common_name: common_name.into(),
            alt_names: alt_names.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the certificate common name.
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// Returns the alternate names, in request order.
    pub fn alt_names(&self) -> &[String] {
        &self.alt_names
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.alt_names.is_empty() {
            f.write_str(&self.common_name)
        } else {
            write!(f, "{} ({})", self.common_name, self.alt_names.join(", "))
        }
    }
}

/// Material returned by a successful issuance.
///
/// The private key is zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct Response {
    certificate: String,
    private_key: String,
    serial: String,
}

impl Response {
    /// Creates a response from PEM certificate, PEM private key and serial number.
    pub fn new(
        certificate: impl Into<String>,
        private_key: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: private_key.into(),
            serial: serial.into(),
        }
    }

    /// Returns the PEM encoded certificate.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// Returns the PEM encoded private key.
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Returns the certificate serial number as reported by the provider.
    pub fn serial(&self) -> &str {
        &self.serial
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .field("serial", &self.serial)
            .finish()
    }
}

/// Raw result of a provider call, before it is turned into a [`Lease`].
#[derive(Clone, Debug, Default)]
pub struct Issued {
    /// Identifier the provider accepts for renewal.
    pub lease_id: String,
    /// Identifier of the request that produced this result.
    pub request_id: String,
    /// Whether `lease_id` can be renewed.
    pub renewable: bool,
    /// Declared validity. Zero means the certificate's own expiry applies.
    pub lease_duration: Duration,
    /// Issued material, if any.
    pub response: Option<Response>,
}

/// Errors returned by [`Provider`] implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The backend could not be reached or is not serving requests.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the request (authorization, revoked lease, closed renewal window).
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// The provider has no renewal path for this lease.
    #[error("lease is not renewable")]
    NotRenewable,

    /// Any other provider failure.
    #[error("provider error: {0}")]
    Other(String),
}

/// Capability to obtain certificate material.
///
/// Implementations must be cheap to share: a single provider is used concurrently
/// by every member that references it.
///
/// # Example
///
/// ```no_run
/// use disttrust::provider::{Issued, Provider, ProviderFuture, Request, Response};
/// use std::time::Duration;
///
/// struct Static(Response);
///
/// impl Provider for Static {
///     fn issue<'a>(&'a self, _request: &'a Request) -> ProviderFuture<'a> {
///         Box::pin(async move {
///             Ok(Issued {
///                 request_id: "static".to_string(),
///                 lease_duration: Duration::from_secs(3600),
///                 response: Some(self.0.clone()),
///                 ..Issued::default()
///             })
///         })
///     }
/// }
/// ```
pub trait Provider: Send + Sync + 'static {
    /// Issues a fresh credential for `request`.
    fn issue<'a>(&'a self, request: &'a Request) -> ProviderFuture<'a>;

    /// Renews `lease` using its identifier.
    ///
    /// The default implementation reports [`ProviderError::NotRenewable`], which
    /// makes callers fall back to [`Provider::issue`].
    fn renew<'a>(&'a self, _lease: &'a Lease) -> ProviderFuture<'a> {
        Box::pin(async { Err(ProviderError::NotRenewable) })
    }
}
