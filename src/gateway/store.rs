//! Contracts for the collaborators the gateway consults per request.
//!
//! Implementations are expected to be internally synchronized (a connection
//! pool, a locked map); the gateway shares them as `Arc<dyn ...>` across every
//! request task and never retries a failed call.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use super::credential::{self, Credential, CredentialError, TokenScope};
use super::identity::{Permissions, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unknown, expired, wrong-scope and mismatched lookups all land here.
    #[error("record not found")]
    NotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Lifecycle of opaque bearer tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist an already generated credential (fingerprint only).
    async fn persist(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Fingerprint `plaintext` and return the owner of a live token in `scope`.
    async fn resolve(&self, scope: TokenScope, plaintext: &str) -> Result<User, StoreError>;

    /// Delete every token `owner_id` holds in `scope`.
    async fn revoke_all(&self, scope: TokenScope, owner_id: Uuid) -> Result<(), StoreError>;

    /// Generate and persist a credential, returning the one-time plaintext.
    async fn issue(
        &self,
        owner_id: Uuid,
        ttl: Duration,
        scope: TokenScope,
    ) -> Result<Credential, StoreError> {
        let credential = credential::generate(owner_id, ttl, scope)?;
        self.persist(&credential).await?;
        Ok(credential)
    }
}

/// Permission lookup for an authenticated account.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn permissions(&self, user_id: Uuid) -> Result<Permissions, StoreError>;
}

/// Run a collaborator call with an upper bound.
///
/// Dropping the inner future on expiry cancels the in-flight lookup.
pub async fn bounded<T, F>(
    limit: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(StoreError::Timeout(operation)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out_slow_calls() {
        let result: Result<(), StoreError> = bounded(Duration::from_secs(3), "lookup", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout("lookup"))));
    }

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let ok = bounded(Duration::from_secs(3), "lookup", async { Ok(7) }).await;
        assert!(matches!(ok, Ok(7)));

        let missing: Result<(), StoreError> =
            bounded(Duration::from_secs(3), "lookup", async { Err(StoreError::NotFound) }).await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }
}
