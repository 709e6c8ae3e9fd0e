//! Process-local store used when no DSN is configured and by tests.
//!
//! Every operation takes the single `RwLock` once, so multi-step writes such
//! as registration are atomic with respect to other callers. Expired tokens
//! are dropped whenever a new one is stored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{NewUser, OutboxMessage, UserStore};
use crate::gateway::credential::{self, Credential, Fingerprint, TokenScope};
use crate::gateway::identity::{Permissions, User};
use crate::gateway::store::{PermissionStore, StoreError, TokenStore};

#[derive(Debug)]
struct TokenRecord {
    owner_id: Uuid,
    expiry: DateTime<Utc>,
    scope: TokenScope,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    tokens: HashMap<Fingerprint, TokenRecord>,
    grants: HashMap<Uuid, BTreeSet<String>>,
    outbox: Vec<OutboxMessage>,
}

impl Inner {
    fn insert_token(&mut self, credential: &Credential) {
        let now = Utc::now();
        self.tokens.retain(|_, record| now < record.expiry);
        self.tokens.insert(
            credential.fingerprint,
            TokenRecord {
                owner_id: credential.owner_id,
                expiry: credential.expiry,
                scope: credential.scope,
            },
        );
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add permission codes to an account.
    pub async fn grant(&self, user_id: Uuid, codes: &[&str]) {
        let mut inner = self.inner.write().await;
        let granted = inner.grants.entry(user_id).or_default();
        granted.extend(codes.iter().map(|code| (*code).to_string()));
    }

    /// Messages queued so far, oldest first.
    pub async fn outbox(&self) -> Vec<OutboxMessage> {
        self.inner.read().await.outbox.clone()
    }

    /// Number of stored tokens for `owner_id` in `scope`, including expired
    /// ones not yet pruned.
    pub async fn token_count(&self, owner_id: Uuid, scope: TokenScope) -> usize {
        self.inner
            .read()
            .await
            .tokens
            .values()
            .filter(|record| record.owner_id == owner_id && record.scope == scope)
            .count()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn persist(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&credential.owner_id) {
            return Err(StoreError::NotFound);
        }
        inner.insert_token(credential);
        Ok(())
    }

    async fn resolve(&self, scope: TokenScope, plaintext: &str) -> Result<User, StoreError> {
        let fingerprint = credential::fingerprint(plaintext);
        let now = Utc::now();
        let inner = self.inner.read().await;
        inner
            .tokens
            .get(&fingerprint)
            .filter(|record| record.scope == scope && now < record.expiry)
            .and_then(|record| inner.users.get(&record.owner_id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn revoke_all(&self, scope: TokenScope, owner_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .tokens
            .retain(|_, record| !(record.owner_id == owner_id && record.scope == scope));
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn permissions(&self, user_id: Uuid) -> Result<Permissions, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .grants
            .get(&user_id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn register(
        &self,
        user: NewUser,
        default_permission: &str,
        activation_ttl: Duration,
    ) -> Result<(User, Credential), StoreError> {
        let mut inner = self.inner.write().await;
        let duplicate = inner
            .users
            .values()
            .any(|existing| existing.email.eq_ignore_ascii_case(&user.email));
        if duplicate {
            return Err(StoreError::DuplicateEmail);
        }

        let created = User {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            activated: false,
            version: 1,
        };
        // Generate before touching any map so a failure leaves nothing behind.
        let activation = credential::generate(created.id, activation_ttl, TokenScope::Activation)?;

        inner.insert_token(&activation);
        inner
            .grants
            .entry(created.id)
            .or_default()
            .insert(default_permission.to_string());
        inner.outbox.push(OutboxMessage::welcome(&created, &activation));
        inner.users.insert(created.id, created.clone());

        Ok((created, activation))
    }

    async fn user_by_email(&self, email: &str) -> Result<User, StoreError> {
        let inner = self.inner.read().await;
        inner
            .users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn request_password_reset(
        &self,
        user: &User,
        ttl: Duration,
    ) -> Result<Credential, StoreError> {
        let reset = credential::generate(user.id, ttl, TokenScope::PasswordReset)?;
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        inner.insert_token(&reset);
        inner.outbox.push(OutboxMessage::password_reset(user, &reset));
        Ok(reset)
    }

    async fn activate(&self, user: &User) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner.users.get_mut(&user.id).ok_or(StoreError::NotFound)?;
        if stored.version != user.version {
            return Err(StoreError::EditConflict);
        }
        stored.activated = true;
        stored.version += 1;
        Ok(stored.clone())
    }
}
