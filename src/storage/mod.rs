//! Account persistence behind the gateway contracts.
//!
//! Both backends implement [`UserStore`] plus the gateway's
//! [`TokenStore`](crate::gateway::store::TokenStore) and
//! [`PermissionStore`](crate::gateway::store::PermissionStore):
//! - [`postgres::PgStore`] for deployments (`--dsn`).
//! - [`memory::MemoryStore`] for local runs and the test suite.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

use crate::gateway::credential::Credential;
use crate::gateway::identity::User;
use crate::gateway::store::StoreError;

/// Outbox template queued for every new registration.
pub const WELCOME_TEMPLATE: &str = "user_welcome";

/// Outbox template carrying a password reset token.
pub const PASSWORD_RESET_TEMPLATE: &str = "password_reset";

/// Validated registration input; the password is already hashed.
#[derive(Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Email queued for delivery by an external mailer.
#[derive(Clone, Debug, Serialize)]
pub struct OutboxMessage {
    pub to_email: String,
    pub template: String,
    pub payload: serde_json::Value,
}

impl OutboxMessage {
    #[must_use]
    pub fn welcome(user: &User, activation: &Credential) -> Self {
        Self {
            to_email: user.email.clone(),
            template: WELCOME_TEMPLATE.to_string(),
            payload: json!({
                "activation_token": activation.plaintext,
                "user_id": user.id,
            }),
        }
    }

    #[must_use]
    pub fn password_reset(user: &User, reset: &Credential) -> Self {
        Self {
            to_email: user.email.clone(),
            template: PASSWORD_RESET_TEMPLATE.to_string(),
            payload: json!({
                "password_reset_token": reset.plaintext,
                "user_id": user.id,
            }),
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert an inactive account, grant `default_permission`, issue an
    /// activation token and queue the welcome email, all or nothing.
    async fn register(
        &self,
        user: NewUser,
        default_permission: &str,
        activation_ttl: Duration,
    ) -> Result<(User, Credential), StoreError>;

    /// Case-insensitive lookup.
    async fn user_by_email(&self, email: &str) -> Result<User, StoreError>;

    /// Issue a password reset token for `user` and queue the email carrying
    /// it, all or nothing.
    async fn request_password_reset(
        &self,
        user: &User,
        ttl: Duration,
    ) -> Result<Credential, StoreError>;

    /// Mark `user` activated if nobody changed it since it was read.
    async fn activate(&self, user: &User) -> Result<User, StoreError>;
}
