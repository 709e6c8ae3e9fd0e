//! Shared handler state and account-flow configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::gateway::Gateway;
use crate::storage::UserStore;

const DEFAULT_AUTHENTICATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_ACTIVATION_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);
const DEFAULT_PASSWORD_RESET_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_PERMISSION: &str = "comments:read";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    environment: String,
    authentication_ttl: Duration,
    activation_ttl: Duration,
    password_reset_ttl: Duration,
    default_permission: String,
}

impl ApiConfig {
    #[must_use]
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            authentication_ttl: DEFAULT_AUTHENTICATION_TTL,
            activation_ttl: DEFAULT_ACTIVATION_TTL,
            password_reset_ttl: DEFAULT_PASSWORD_RESET_TTL,
            default_permission: DEFAULT_PERMISSION.to_string(),
        }
    }

    #[must_use]
    pub fn with_authentication_ttl(mut self, ttl: Duration) -> Self {
        self.authentication_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_activation_ttl(mut self, ttl: Duration) -> Self {
        self.activation_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_password_reset_ttl(mut self, ttl: Duration) -> Self {
        self.password_reset_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_default_permission(mut self, code: impl Into<String>) -> Self {
        self.default_permission = code.into();
        self
    }

    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    #[must_use]
    pub const fn authentication_ttl(&self) -> Duration {
        self.authentication_ttl
    }

    #[must_use]
    pub const fn activation_ttl(&self) -> Duration {
        self.activation_ttl
    }

    #[must_use]
    pub const fn password_reset_ttl(&self) -> Duration {
        self.password_reset_ttl
    }

    #[must_use]
    pub fn default_permission(&self) -> &str {
        &self.default_permission
    }
}

/// Everything a handler needs, cloned into each request as an `Extension`.
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<Gateway>,
    pub users: Arc<dyn UserStore>,
    pub config: Arc<ApiConfig>,
}

impl ApiState {
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, users: Arc<dyn UserStore>, config: ApiConfig) -> Self {
        Self {
            gateway,
            users,
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ApiConfig::new("development");
        assert_eq!(config.environment(), "development");
        assert_eq!(config.authentication_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.activation_ttl(), Duration::from_secs(259_200));
        assert_eq!(config.password_reset_ttl(), Duration::from_secs(3_600));
        assert_eq!(config.default_permission(), "comments:read");
    }

    #[test]
    fn config_overrides() {
        let config = ApiConfig::new("staging")
            .with_authentication_ttl(Duration::from_secs(60))
            .with_activation_ttl(Duration::from_secs(120))
            .with_password_reset_ttl(Duration::from_secs(300))
            .with_default_permission("reviews:read");
        assert_eq!(config.authentication_ttl(), Duration::from_secs(60));
        assert_eq!(config.activation_ttl(), Duration::from_secs(120));
        assert_eq!(config.password_reset_ttl(), Duration::from_secs(300));
        assert_eq!(config.default_permission(), "reviews:read");
    }
}
