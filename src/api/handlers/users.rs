//! Account registration, activation and self-inspection.
//!
//! Flow Overview:
//! 1) `POST /v1/users` hashes the password and registers an inactive account;
//!    the store queues a welcome email carrying the activation token.
//! 2) `PUT /v1/users/activated` resolves that token, flips the account to
//!    activated and revokes every activation token the account holds.
//! 3) `GET /v1/users/me*` sit behind the activated gate.

use anyhow::anyhow;
use axum::{
    extract::{Extension, Json, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info};
use utoipa::ToSchema;

use super::{PermissionsEnvelope, UserEnvelope};
use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::api::validation::{
    Validator, validate_email, validate_password, validate_token, validate_username,
};
use crate::gateway::credential::TokenScope;
use crate::gateway::identity::Identity;
use crate::gateway::password;
use crate::gateway::store::{StoreError, bounded};
use crate::storage::NewUser;

#[derive(ToSchema, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivateRequest {
    pub token: String,
}

#[utoipa::path(
    post,
    path = "/v1/users",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, activation email queued", body = UserEnvelope),
        (status = 400, description = "Malformed JSON body", body = super::ErrorBody),
        (status = 422, description = "Validation failed or email already registered"),
        (status = 429, description = "Rate limit exceeded", body = super::ErrorBody)
    ),
    tag = "users"
)]
pub async fn register(
    Extension(state): Extension<ApiState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    let mut v = Validator::new();
    validate_username(&mut v, &request.username);
    validate_email(&mut v, &request.email);
    validate_password(&mut v, &request.password);
    v.finish()?;

    let password_hash = password::hash_blocking(request.password).await?;

    let new_user = NewUser {
        username: request.username,
        email: request.email,
        password_hash,
    };
    let (user, _activation) = bounded(
        state.gateway.lookup_timeout(),
        "user registration",
        state.users.register(
            new_user,
            state.config.default_permission(),
            state.config.activation_ttl(),
        ),
    )
    .await?;

    info!(user_id = %user.id, "registered user, welcome email queued");

    Ok((StatusCode::CREATED, Json(UserEnvelope { user })))
}

#[utoipa::path(
    put,
    path = "/v1/users/activated",
    request_body = ActivateRequest,
    responses(
        (status = 200, description = "Account activated", body = UserEnvelope),
        (status = 400, description = "Malformed JSON body", body = super::ErrorBody),
        (status = 409, description = "Account changed concurrently", body = super::ErrorBody),
        (status = 422, description = "Token malformed, unknown or expired"),
        (status = 429, description = "Rate limit exceeded", body = super::ErrorBody)
    ),
    tag = "users"
)]
pub async fn activate(
    Extension(state): Extension<ApiState>,
    payload: Result<Json<ActivateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    let mut v = Validator::new();
    validate_token(&mut v, &request.token);
    v.finish()?;

    let timeout = state.gateway.lookup_timeout();
    let tokens = state.gateway.tokens();

    let user = match bounded(
        timeout,
        "activation token lookup",
        tokens.resolve(TokenScope::Activation, &request.token),
    )
    .await
    {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            return Err(ApiError::invalid("token", "invalid or expired activation token"));
        }
        Err(err) => return Err(err.into()),
    };

    let user = bounded(timeout, "user activation", state.users.activate(&user)).await?;

    bounded(
        timeout,
        "activation token revocation",
        tokens.revoke_all(TokenScope::Activation, user.id),
    )
    .await?;

    debug!(user_id = %user.id, "activated user");

    Ok(Json(UserEnvelope { user }))
}

#[utoipa::path(
    get,
    path = "/v1/users/me",
    responses(
        (status = 200, description = "The calling account", body = UserEnvelope),
        (status = 401, description = "Missing or invalid bearer token", body = super::ErrorBody),
        (status = 403, description = "Account not activated", body = super::ErrorBody)
    ),
    security(("bearer_token" = [])),
    tag = "users"
)]
pub async fn me(Extension(identity): Extension<Identity>) -> Result<impl IntoResponse, ApiError> {
    let user = identity
        .account()
        .cloned()
        .ok_or_else(|| ApiError::Internal(anyhow!("activated route reached anonymously")))?;
    Ok(Json(UserEnvelope { user }))
}

#[utoipa::path(
    get,
    path = "/v1/users/me/permissions",
    responses(
        (status = 200, description = "Permission codes held by the calling account", body = PermissionsEnvelope),
        (status = 401, description = "Missing or invalid bearer token", body = super::ErrorBody),
        (status = 403, description = "Account not activated", body = super::ErrorBody)
    ),
    security(("bearer_token" = [])),
    tag = "users"
)]
pub async fn my_permissions(
    Extension(state): Extension<ApiState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity
        .account()
        .ok_or_else(|| ApiError::Internal(anyhow!("activated route reached anonymously")))?;

    let granted = bounded(
        state.gateway.lookup_timeout(),
        "permission lookup",
        state.gateway.permissions().permissions(user.id),
    )
    .await?;

    Ok(Json(PermissionsEnvelope {
        permissions: granted.iter().map(str::to_string).collect(),
    }))
}
