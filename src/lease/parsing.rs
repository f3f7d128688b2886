//! Internal PEM and X.509 helpers.

use super::DecodeError;
use time::OffsetDateTime;
use x509_parser::error::X509Error;
use x509_parser::nom::Err;
use x509_parser::pem::parse_x509_pem;

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Returns the `notAfter` of the first certificate in a PEM string.
///
/// Only the first PEM block is inspected; for a chain this is the leaf.
pub(crate) fn certificate_not_after(pem: &str) -> Result<OffsetDateTime, DecodeError> {
    let (_, block) = parse_x509_pem(pem.as_bytes()).map_err(|e| match e {
        Err::Incomplete(_) => DecodeError::Pem("incomplete PEM block".to_string()),
        Err::Error(err) | Err::Failure(err) => DecodeError::Pem(err.to_string()),
    })?;

    if block.label != CERTIFICATE_LABEL {
        return Err(DecodeError::UnexpectedPemLabel(block.label));
    }

    let (_, cert) = x509_parser::parse_x509_certificate(&block.contents).map_err(|e| match e {
        Err::Incomplete(_) => DecodeError::X509(X509Error::InvalidCertificate),
        Err::Error(err) | Err::Failure(err) => DecodeError::X509(err),
    })?;

    Ok(cert.validity().not_after.to_datetime())
}
