//! Salted, deliberately slow password hashing.
//!
//! Hashes are Argon2id PHC strings with a fixed work factor: 64 MiB of memory,
//! 3 passes, 1 lane. On commodity hardware a single hash takes a few hundred
//! milliseconds, which is the point: offline guessing must stay expensive.
//! Callers on an async runtime should go through [`hash_blocking`] and
//! [`verify_blocking`] so the work runs on the blocking pool.

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{self, SaltString},
};
use rand::rngs::OsRng;
use std::sync::OnceLock;

pub const MEMORY_COST_KIB: u32 = 64 * 1024;
pub const TIME_COST: u32 = 3;
pub const PARALLELISM: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("invalid argon2 parameters: {0}")]
    Params(argon2::Error),
    #[error("failed to hash password: {0}")]
    Hash(password_hash::Error),
    #[error("stored password hash is corrupt: {0}")]
    CorruptHash(password_hash::Error),
    #[error("password verification failed: {0}")]
    Verify(password_hash::Error),
    #[error("password worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

fn argon2() -> Result<Argon2<'static>, PasswordError> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, None)
        .map_err(PasswordError::Params)?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a plaintext password into a self-describing PHC string.
///
/// # Errors
/// Any failure here is fatal for the calling operation.
pub fn hash(plaintext: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2()?
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(PasswordError::Hash)?;
    Ok(hash.to_string())
}

/// Check `candidate` against a stored hash.
///
/// Returns `Ok(false)` on a plain mismatch. `Err` is reserved for verifier
/// failures such as a corrupt stored hash, so callers can tell "wrong
/// password" (401) from "system error" (500).
///
/// # Errors
/// Returns an error if the stored hash cannot be parsed or verification fails internally.
pub fn verify(password_hash: &str, candidate: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(password_hash).map_err(PasswordError::CorruptHash)?;
    // Parameters come from the PHC string, so older work factors keep verifying.
    match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(err) => Err(PasswordError::Verify(err)),
    }
}

static DECOY_HASH: OnceLock<String> = OnceLock::new();

fn decoy_hash() -> Result<&'static str, PasswordError> {
    if let Some(stored) = DECOY_HASH.get() {
        return Ok(stored.as_str());
    }
    let stored = hash("vestibule decoy password")?;
    Ok(DECOY_HASH.get_or_init(|| stored).as_str())
}

/// Spend a full verification on `candidate` when there is no account to check
/// it against, so an unknown email costs as much as a wrong password.
///
/// # Errors
/// Same as [`verify`].
pub fn verify_decoy(candidate: &str) -> Result<(), PasswordError> {
    verify(decoy_hash()?, candidate).map(|_| ())
}

/// [`hash`] on the blocking thread pool.
///
/// # Errors
/// Same as [`hash`], plus a worker join failure.
pub async fn hash_blocking(plaintext: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash(&plaintext)).await?
}

/// [`verify`] on the blocking thread pool.
///
/// # Errors
/// Same as [`verify`], plus a worker join failure.
pub async fn verify_blocking(password_hash: String, candidate: String) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify(&password_hash, &candidate)).await?
}

/// [`verify_decoy`] on the blocking thread pool.
///
/// # Errors
/// Same as [`verify_decoy`], plus a worker join failure.
pub async fn verify_decoy_blocking(candidate: String) -> Result<(), PasswordError> {
    tokio::task::spawn_blocking(move || verify_decoy(&candidate)).await?
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_matches() {
        let stored = hash("correct horse battery").unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(stored.contains(&format!("m={MEMORY_COST_KIB},t={TIME_COST},p={PARALLELISM}")));
        assert!(verify(&stored, "correct horse battery").unwrap());
        assert!(!verify(&stored, "correct horse battery!").unwrap());
        assert!(!verify(&stored, "").unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash("pa55word").unwrap();
        let second = hash("pa55word").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn corrupt_hash_is_an_error_not_a_mismatch() {
        let result = verify("not-a-phc-string", "pa55word");
        assert!(matches!(result, Err(PasswordError::CorruptHash(_))));
    }

    #[test]
    fn decoy_runs_a_full_verification() {
        verify_decoy("anything at all").unwrap();
        let stored = decoy_hash().unwrap();
        assert!(stored.contains(&format!("m={MEMORY_COST_KIB},t={TIME_COST},p={PARALLELISM}")));
        assert!(!verify(stored, "anything at all").unwrap());
        assert!(std::ptr::eq(stored, decoy_hash().unwrap()));
    }

    #[tokio::test]
    async fn blocking_variants_round_trip() -> anyhow::Result<()> {
        let stored = hash_blocking("pa55word".to_string()).await?;
        assert!(verify_blocking(stored.clone(), "pa55word".to_string()).await?);
        assert!(!verify_blocking(stored, "pa55wore".to_string()).await?);
        Ok(())
    }
}
