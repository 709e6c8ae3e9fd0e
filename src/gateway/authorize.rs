//! Authorization chain: authenticated ⊂ activated ⊂ permitted.
//!
//! Each stricter gate runs the looser ones first, so an anonymous caller on a
//! permission-gated route is told to authenticate, and an inactive account is
//! told to activate, before any permission lookup happens.

use std::time::Duration;

use super::error::AdmissionError;
use super::identity::{Identity, Permissions, User};
use super::store::{PermissionStore, bounded};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Gate {
    Authenticated,
    Activated,
    Permission(String),
}

impl Gate {
    #[must_use]
    pub fn permission(code: impl Into<String>) -> Self {
        Self::Permission(code.into())
    }

    /// Run the gate against `identity`, fetching permissions only when the
    /// gate needs them and the activation check has already passed.
    ///
    /// # Errors
    /// Returns the first denial in chain order, or `Internal` when the
    /// permission lookup fails or exceeds `timeout`.
    pub async fn evaluate(
        &self,
        identity: &Identity,
        permissions: &dyn PermissionStore,
        timeout: Duration,
    ) -> Result<(), AdmissionError> {
        match self {
            Self::Authenticated => check_authenticated(identity).map(|_| ()),
            Self::Activated => check_activated(identity).map(|_| ()),
            Self::Permission(code) => {
                let user = check_activated(identity)?;
                let granted = bounded(timeout, "permission lookup", permissions.permissions(user.id))
                    .await
                    .map_err(|err| {
                        AdmissionError::Internal(
                            anyhow::Error::new(err).context("fetch permissions"),
                        )
                    })?;
                check_permitted(identity, &granted, code)
            }
        }
    }
}

/// Passes iff the caller is not anonymous.
///
/// # Errors
/// `AuthenticationRequired` for anonymous callers.
pub fn check_authenticated(identity: &Identity) -> Result<&User, AdmissionError> {
    identity.account().ok_or(AdmissionError::AuthenticationRequired)
}

/// Passes iff the caller is authenticated and activated.
///
/// # Errors
/// `AuthenticationRequired` first, then `InactiveAccount`.
pub fn check_activated(identity: &Identity) -> Result<&User, AdmissionError> {
    let user = check_authenticated(identity)?;
    if user.activated {
        Ok(user)
    } else {
        Err(AdmissionError::InactiveAccount)
    }
}

/// Passes iff the caller is activated and `granted` contains `code`.
///
/// # Errors
/// The activated gate's denials, then `NotPermitted`.
pub fn check_permitted(
    identity: &Identity,
    granted: &Permissions,
    code: &str,
) -> Result<(), AdmissionError> {
    check_activated(identity)?;
    if granted.include(code) {
        Ok(())
    } else {
        Err(AdmissionError::NotPermitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::identity::test_user;
    use crate::gateway::store::StoreError;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct FixedPermissions {
        granted: Permissions,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FixedPermissions {
        fn granting(codes: &[&str]) -> Self {
            Self {
                granted: codes.iter().copied().collect(),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::granting(&[])
            }
        }
    }

    #[async_trait]
    impl PermissionStore for FixedPermissions {
        async fn permissions(&self, _user_id: Uuid) -> Result<Permissions, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::Backend(anyhow!("permissions table unavailable")));
            }
            Ok(self.granted.clone())
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(3);

    #[test]
    fn anonymous_on_activated_gate_needs_authentication() {
        assert!(matches!(
            check_activated(&Identity::Anonymous),
            Err(AdmissionError::AuthenticationRequired)
        ));
    }

    #[test]
    fn inactive_account_is_rejected_by_activated_gate_only() {
        let identity = Identity::user(test_user(false));
        assert!(check_authenticated(&identity).is_ok());
        assert!(matches!(
            check_activated(&identity),
            Err(AdmissionError::InactiveAccount)
        ));
    }

    #[test]
    fn permission_check_composes_outer_gates() {
        let granted: Permissions = ["reviews:write"].into_iter().collect();
        assert!(matches!(
            check_permitted(&Identity::Anonymous, &granted, "reviews:write"),
            Err(AdmissionError::AuthenticationRequired)
        ));
        assert!(matches!(
            check_permitted(&Identity::user(test_user(false)), &granted, "reviews:write"),
            Err(AdmissionError::InactiveAccount)
        ));
        assert!(check_permitted(&Identity::user(test_user(true)), &granted, "reviews:write").is_ok());
    }

    #[tokio::test]
    async fn missing_permission_is_not_permitted() {
        let store = FixedPermissions::granting(&["comments:read"]);
        let identity = Identity::user(test_user(true));
        let result = Gate::permission("reviews:write")
            .evaluate(&identity, &store, TIMEOUT)
            .await;
        assert!(matches!(result, Err(AdmissionError::NotPermitted)));
    }

    #[tokio::test]
    async fn held_permission_passes() -> anyhow::Result<()> {
        let store = FixedPermissions::granting(&["comments:read", "reviews:write"]);
        let identity = Identity::user(test_user(true));
        Gate::permission("reviews:write")
            .evaluate(&identity, &store, TIMEOUT)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn permissions_are_not_fetched_before_activation_passes() {
        let store = FixedPermissions::granting(&["reviews:write"]);
        let gate = Gate::permission("reviews:write");

        let anonymous = gate.evaluate(&Identity::Anonymous, &store, TIMEOUT).await;
        assert!(matches!(anonymous, Err(AdmissionError::AuthenticationRequired)));

        let inactive = gate
            .evaluate(&Identity::user(test_user(false)), &store, TIMEOUT)
            .await;
        assert!(matches!(inactive, Err(AdmissionError::InactiveAccount)));

        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lookup_failure_fails_closed_as_internal() {
        let store = FixedPermissions::failing();
        let result = Gate::permission("reviews:write")
            .evaluate(&Identity::user(test_user(true)), &store, TIMEOUT)
            .await;
        assert!(matches!(result, Err(AdmissionError::Internal(_))));
    }

    #[tokio::test]
    async fn non_permission_gates_never_fetch() -> anyhow::Result<()> {
        let store = FixedPermissions::failing();
        let identity = Identity::user(test_user(true));
        Gate::Authenticated.evaluate(&identity, &store, TIMEOUT).await?;
        Gate::Activated.evaluate(&identity, &store, TIMEOUT).await?;
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
