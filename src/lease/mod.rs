//! Issued credentials and their validity windows.
//!
//! A [`Lease`] is built from a provider's [`Issued`] result. Its expiry (`till`) is
//! either the provider-declared lease duration counted from issuance, or, when the
//! provider declares none, the `notAfter` of the issued certificate.

pub(crate) mod parsing;

use crate::provider::{Issued, Request, Response};
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;
use x509_parser::error::X509Error;

/// An error that may arise building a [`Lease`] from a provider result.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum DecodeError {
    /// The certificate is not valid PEM.
    #[error("failed decoding PEM certificate: {0}")]
    Pem(String),

    /// The first PEM block is not a certificate.
    #[error("unexpected PEM block: {0}")]
    UnexpectedPemLabel(String),

    /// Error returned by the X.509 parsing library.
    #[error("failed parsing X.509 certificate: {0}")]
    X509(#[from] X509Error),

    /// No lease duration was declared and no certificate was returned to derive one from.
    #[error("no lease duration and no certificate to derive expiry from")]
    MissingCertificate,

    /// The provider returned no material at all.
    #[error("provider returned no response")]
    MissingResponse,

    /// The declared lease duration cannot be represented.
    #[error("lease duration out of range")]
    LeaseDurationOutOfRange,

    /// The computed expiry is not after issuance.
    #[error("certificate already expired at {not_after}")]
    Expired {
        /// The computed expiry.
        not_after: OffsetDateTime,
    },
}

/// One issued credential and its validity window.
///
/// Leases are never mutated: renewal produces a new lease.
///
/// Invariant: `till > start`.
#[derive(Clone)]
pub struct Lease {
    id: String,
    renewable: bool,
    request: Request,
    response: Option<Response>,
    start: OffsetDateTime,
    till: OffsetDateTime,
}

impl Lease {
    /// Builds a lease from a provider result, issued now.
    ///
    /// # Errors
    ///
    /// See [`Lease::from_issuance_at`].
    pub fn from_issuance(request: Request, issued: Issued) -> Result<Self, DecodeError> {
        Self::from_issuance_at(request, issued, OffsetDateTime::now_utc())
    }

    /// Builds a lease from a provider result, issued at `now`.
    ///
    /// With a nonzero `lease_duration`, `till = now + lease_duration`. Otherwise the
    /// certificate in the response is decoded and `till` is its `notAfter`.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::MissingCertificate`] if no duration is declared and no certificate is present.
    /// - [`DecodeError::Pem`], [`DecodeError::UnexpectedPemLabel`], [`DecodeError::X509`] if the
    ///   certificate cannot be decoded.
    /// - [`DecodeError::Expired`] if the resulting expiry is not after `now`.
    pub fn from_issuance_at(
        request: Request,
        issued: Issued,
        now: OffsetDateTime,
    ) -> Result<Self, DecodeError> {
        let Issued {
            lease_id,
            request_id,
            renewable,
            lease_duration,
            response,
        } = issued;

        let till = if lease_duration.is_zero() {
            let certificate = response
                .as_ref()
                .map(Response::certificate)
                .filter(|c| !c.trim().is_empty())
                .ok_or(DecodeError::MissingCertificate)?;
            parsing::certificate_not_after(certificate)?
        } else {
            time::Duration::try_from(lease_duration)
                .ok()
                .and_then(|d| now.checked_add(d))
                .ok_or(DecodeError::LeaseDurationOutOfRange)?
        };

        if till <= now {
            return Err(DecodeError::Expired { not_after: till });
        }

        Ok(Self {
            id: if renewable { lease_id } else { request_id },
            renewable,
            request,
            response,
            start: now,
            till,
        })
    }

    /// Returns the renewal identifier if renewable, else the request identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `true` if the provider can renew this lease by id.
    pub fn is_renewable(&self) -> bool {
        self.renewable
    }

    /// Returns the request this lease was issued for.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the issued material, if any.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Returns `true` if the lease carries issued material.
    ///
    /// Leases without a response are never applied or scheduled.
    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Returns the issuance time.
    pub fn start(&self) -> OffsetDateTime {
        self.start
    }

    /// Returns the expiry time.
    pub fn till(&self) -> OffsetDateTime {
        self.till
    }

    /// Returns the full validity window, `till - start`.
    pub fn window(&self) -> time::Duration {
        self.till - self.start
    }

    /// Returns `till - now`. Negative once the lease has expired.
    pub fn remaining(&self, now: OffsetDateTime) -> time::Duration {
        self.till - now
    }

    /// Returns `true` if the lease has not yet expired at `now`.
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.remaining(now).is_positive()
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("renewable", &self.renewable)
            .field("request", &self.request)
            .field("has_response", &self.has_response())
            .field("start", &self.start)
            .field("till", &self.till)
            .finish()
    }
}
