//! Authentication stage: `Authorization: Bearer <token>` to [`Identity`].
//!
//! No header, or an empty one, is a valid outcome (anonymous). A header that
//! is present but unusable is rejected without touching the token store.

use axum::http::{HeaderMap, header};
use std::time::Duration;

use super::credential::{self, TokenScope};
use super::error::AdmissionError;
use super::identity::Identity;
use super::store::{StoreError, TokenStore, bounded};

const SCHEME: &str = "Bearer";

/// Extract the bearer plaintext, if any. An empty header counts as absent.
///
/// # Errors
/// Returns `InvalidCredential` when the header is not UTF-8, does not have
/// exactly two space-separated parts, or uses a scheme other than `Bearer`.
pub fn parse_authorization(headers: &HeaderMap) -> Result<Option<&str>, AdmissionError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AdmissionError::InvalidCredential)?;
    if value.is_empty() {
        return Ok(None);
    }

    let parts: Vec<&str> = value.split(' ').collect();
    match parts.as_slice() {
        [scheme, token] if *scheme == SCHEME => Ok(Some(*token)),
        _ => Err(AdmissionError::InvalidCredential),
    }
}

/// Resolve the caller behind `headers`.
///
/// # Errors
/// `InvalidCredential` for malformed, unknown or expired tokens; `Internal`
/// for store failures and lookups exceeding `timeout`.
pub async fn resolve_identity(
    headers: &HeaderMap,
    tokens: &dyn TokenStore,
    timeout: Duration,
) -> Result<Identity, AdmissionError> {
    let Some(plaintext) = parse_authorization(headers)? else {
        return Ok(Identity::Anonymous);
    };

    credential::validate_plaintext(plaintext).map_err(|_| AdmissionError::InvalidCredential)?;

    let lookup = tokens.resolve(TokenScope::Authentication, plaintext);
    match bounded(timeout, "token lookup", lookup).await {
        Ok(user) => Ok(Identity::user(user)),
        Err(StoreError::NotFound) => Err(AdmissionError::InvalidCredential),
        Err(err) => Err(AdmissionError::Internal(
            anyhow::Error::new(err).context("resolve bearer token"),
        )),
    }
}
