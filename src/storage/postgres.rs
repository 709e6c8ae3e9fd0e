//! PostgreSQL store (schema in `sql/schema.sql`).
//!
//! Tokens are keyed by their SHA-256 fingerprint; plaintext never reaches the
//! database. Registration runs in one transaction so the account, its default
//! permission, its activation token and the welcome email land together; a
//! password reset request writes its token and email the same way.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::{NewUser, OutboxMessage, UserStore};
use crate::gateway::credential::{self, Credential, TokenScope};
use crate::gateway::identity::{Permissions, User};
use crate::gateway::store::{PermissionStore, StoreError, TokenStore};

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        activated: row.get("activated"),
        version: row.get("version"),
    }
}

async fn insert_token(conn: &mut PgConnection, credential: &Credential) -> Result<(), StoreError> {
    let query = r"
        INSERT INTO tokens (hash, user_id, expiry, scope)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&credential.fingerprint[..])
        .bind(credential.owner_id)
        .bind(credential.expiry)
        .bind(credential.scope.as_str())
        .execute(conn)
        .instrument(span)
        .await
        .with_context(|| format!("failed to insert {} token", credential.scope))?;
    Ok(())
}

async fn insert_outbox(conn: &mut PgConnection, message: &OutboxMessage) -> Result<(), StoreError> {
    let payload_text =
        serde_json::to_string(&message.payload).context("failed to serialize email payload")?;
    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&message.to_email)
        .bind(&message.template)
        .bind(payload_text)
        .execute(conn)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}

#[async_trait]
impl TokenStore for PgStore {
    async fn persist(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        insert_token(&mut conn, credential).await
    }

    async fn resolve(&self, scope: TokenScope, plaintext: &str) -> Result<User, StoreError> {
        let fingerprint = credential::fingerprint(plaintext);
        let query = r"
            SELECT users.id, users.created_at, users.username, users.email,
                   users.password_hash, users.activated, users.version
            FROM users
            INNER JOIN tokens ON users.id = tokens.user_id
            WHERE tokens.hash = $1
              AND tokens.scope = $2
              AND tokens.expiry > $3
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&fingerprint[..])
            .bind(scope.as_str())
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to resolve token")?;

        row.as_ref().map(user_from_row).ok_or(StoreError::NotFound)
    }

    async fn revoke_all(&self, scope: TokenScope, owner_id: Uuid) -> Result<(), StoreError> {
        let query = "DELETE FROM tokens WHERE scope = $1 AND user_id = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(scope.as_str())
            .bind(owner_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke tokens")?;
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn permissions(&self, user_id: Uuid) -> Result<Permissions, StoreError> {
        let query = r"
            SELECT permissions.code
            FROM permissions
            INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
            WHERE users_permissions.user_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch permissions")?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("code"))
            .collect())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn register(
        &self,
        user: NewUser,
        default_permission: &str,
        activation_ttl: Duration,
    ) -> Result<(User, Credential), StoreError> {
        let mut tx = self.pool.begin().await.context("begin register transaction")?;

        let query = r"
            INSERT INTO users (username, email, password_hash, activated)
            VALUES ($1, $2, $3, false)
            RETURNING id, created_at, username, email, password_hash, activated, version
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await;
        let created = match row {
            Ok(row) => user_from_row(&row),
            // Dropping `tx` rolls the transaction back.
            Err(err) if is_unique_violation(&err) => return Err(StoreError::DuplicateEmail),
            Err(err) => return Err(anyhow::Error::new(err).context("failed to insert user").into()),
        };

        // Unknown codes are created so a configured default always takes effect.
        let query = r"
            WITH code AS (
                INSERT INTO permissions (code) VALUES ($2)
                ON CONFLICT (code) DO UPDATE SET code = EXCLUDED.code
                RETURNING id
            )
            INSERT INTO users_permissions (user_id, permission_id)
            SELECT $1, code.id FROM code
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(created.id)
            .bind(default_permission)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to grant default permission")?;

        let activation = credential::generate(created.id, activation_ttl, TokenScope::Activation)?;
        insert_token(&mut tx, &activation).await?;
        insert_outbox(&mut tx, &OutboxMessage::welcome(&created, &activation)).await?;

        tx.commit().await.context("commit register transaction")?;

        Ok((created, activation))
    }

    async fn user_by_email(&self, email: &str) -> Result<User, StoreError> {
        let query = r"
            SELECT id, created_at, username, email, password_hash, activated, version
            FROM users
            WHERE lower(email) = lower($1)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;

        row.as_ref().map(user_from_row).ok_or(StoreError::NotFound)
    }

    async fn request_password_reset(
        &self,
        user: &User,
        ttl: Duration,
    ) -> Result<Credential, StoreError> {
        let reset = credential::generate(user.id, ttl, TokenScope::PasswordReset)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin password reset transaction")?;
        insert_token(&mut tx, &reset).await?;
        insert_outbox(&mut tx, &OutboxMessage::password_reset(user, &reset)).await?;
        tx.commit().await.context("commit password reset transaction")?;

        Ok(reset)
    }

    async fn activate(&self, user: &User) -> Result<User, StoreError> {
        let query = r"
            UPDATE users
            SET activated = true, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING id, created_at, username, email, password_hash, activated, version
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user.id)
            .bind(user.version)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to activate user")?;

        row.as_ref().map(user_from_row).ok_or(StoreError::EditConflict)
    }
}
