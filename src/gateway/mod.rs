//! Admission pipeline run in front of every handler.
//!
//! Flow Overview:
//! 1) [`rate_limit`] admits or refuses the request by client address.
//! 2) [`authenticate`] turns the bearer header into an [`Identity`] and stores
//!    it in the request extensions.
//! 3) [`authorize`] gates, attached per route with [`gated`], decide whether
//!    that identity may run the handler.
//!
//! The [`Gateway`] value is built once at startup and shared read-only by all
//! request tasks; the only mutable shared state lives inside the limiter.

pub mod authenticate;
pub mod authorize;
pub mod credential;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod password;
pub mod rate_limit;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

pub use authorize::Gate;
pub use error::AdmissionError;
pub use identity::{Identity, Permissions, User};
pub use middleware::{admit, gated};

use rate_limit::RateLimiter;
use store::{PermissionStore, TokenStore};

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Collaborators and settings shared by the admission middleware.
#[derive(Clone)]
pub struct Gateway {
    limiter: Arc<dyn RateLimiter>,
    tokens: Arc<dyn TokenStore>,
    permissions: Arc<dyn PermissionStore>,
    lookup_timeout: Duration,
    trust_proxy_headers: bool,
}

impl Gateway {
    #[must_use]
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        tokens: Arc<dyn TokenStore>,
        permissions: Arc<dyn PermissionStore>,
    ) -> Self {
        Self {
            limiter,
            tokens,
            permissions,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            trust_proxy_headers: false,
        }
    }

    /// Upper bound on each token or permission lookup.
    #[must_use]
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Key clients by `X-Forwarded-For` / `X-Real-IP` before the socket peer.
    /// Only enable behind a proxy that overwrites those headers.
    #[must_use]
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    #[must_use]
    pub fn limiter(&self) -> &dyn RateLimiter {
        self.limiter.as_ref()
    }

    #[must_use]
    pub fn tokens(&self) -> &dyn TokenStore {
        self.tokens.as_ref()
    }

    #[must_use]
    pub fn permissions(&self) -> &dyn PermissionStore {
        self.permissions.as_ref()
    }

    #[must_use]
    pub const fn lookup_timeout(&self) -> Duration {
        self.lookup_timeout
    }

    #[must_use]
    pub const fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("limiter_enabled", &self.limiter.enabled())
            .field("lookup_timeout", &self.lookup_timeout)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .finish_non_exhaustive()
    }
}
