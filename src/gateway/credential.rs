//! Opaque bearer token generation and fingerprinting.
//!
//! Plaintext tokens are 16 random bytes encoded as unpadded RFC 4648 base32,
//! which always yields 26 characters. Only the SHA-256 fingerprint of the
//! plaintext is ever persisted or compared; the plaintext leaves the server
//! exactly once, in the response that issued it.

use base32::Alphabet;
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

/// Length of every well-formed plaintext token.
pub const PLAINTEXT_LEN: usize = 26;

const RANDOM_BYTES: usize = 16;

/// One-way digest of a plaintext token.
pub type Fingerprint = [u8; 32];

/// What a token may be used for. A token never crosses scopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    Activation,
    Authentication,
    #[serde(rename = "password-reset")]
    PasswordReset,
}

impl TokenScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::Authentication => "authentication",
            Self::PasswordReset => "password-reset",
        }
    }
}

impl std::fmt::Display for TokenScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to generate token: {0}")]
    Entropy(#[from] rand::Error),
    #[error("token ttl out of range")]
    TtlOutOfRange,
}

/// Why a presented plaintext was rejected before any lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MalformedToken {
    #[error("must be provided")]
    Empty,
    #[error("must be 26 bytes long")]
    WrongLength,
}

/// A freshly issued token.
///
/// Serializes as `{"token": ..., "expiry": ...}`; the fingerprint, owner and
/// scope stay server-side.
#[derive(ToSchema, Serialize, Clone)]
pub struct Credential {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub fingerprint: Fingerprint,
    #[serde(skip)]
    pub owner_id: Uuid,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub scope: TokenScope,
}

impl Credential {
    /// A token is usable iff it has not expired and was issued for `scope`.
    #[must_use]
    pub fn is_valid_for(&self, scope: TokenScope, now: DateTime<Utc>) -> bool {
        self.scope == scope && now < self.expiry
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("plaintext", &"***")
            .field("owner_id", &self.owner_id)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Build a new credential for `owner_id` expiring `ttl` from now.
///
/// Pure construction: persisting it is up to the token store.
///
/// # Errors
/// Returns an error if the OS random source fails or `ttl` does not fit a timestamp.
pub fn generate(
    owner_id: Uuid,
    ttl: Duration,
    scope: TokenScope,
) -> Result<Credential, CredentialError> {
    let ttl = chrono::Duration::from_std(ttl).map_err(|_| CredentialError::TtlOutOfRange)?;
    let expiry = Utc::now()
        .checked_add_signed(ttl)
        .ok_or(CredentialError::TtlOutOfRange)?;

    let mut bytes = [0u8; RANDOM_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    let plaintext = base32::encode(Alphabet::Rfc4648 { padding: false }, &bytes);

    Ok(Credential {
        fingerprint: fingerprint(&plaintext),
        plaintext,
        owner_id,
        expiry,
        scope,
    })
}

/// SHA-256 of the plaintext, used at issuance and at lookup.
#[must_use]
pub fn fingerprint(plaintext: &str) -> Fingerprint {
    let digest = Sha256::digest(plaintext.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Cheap shape check, run before any digest or store lookup.
///
/// # Errors
/// Returns the first rule the plaintext breaks.
pub fn validate_plaintext(plaintext: &str) -> Result<(), MalformedToken> {
    if plaintext.is_empty() {
        return Err(MalformedToken::Empty);
    }
    if plaintext.len() != PLAINTEXT_LEN {
        return Err(MalformedToken::WrongLength);
    }
    Ok(())
}
