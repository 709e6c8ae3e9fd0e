use axum::{
    extract::{Extension, Json, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::debug;
use utoipa::ToSchema;

use super::{MessageEnvelope, TokenEnvelope};
use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::api::validation::{Validator, validate_email, validate_password};
use crate::gateway::credential::TokenScope;
use crate::gateway::error::AdmissionError;
use crate::gateway::password;
use crate::gateway::store::{StoreError, bounded};

pub const PASSWORD_RESET_MESSAGE: &str =
    "an email will be sent to you containing password reset instructions";

#[derive(ToSchema, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[utoipa::path(
    post,
    path = "/v1/tokens/authentication",
    request_body = CredentialsRequest,
    responses(
        (status = 201, description = "Bearer token issued; the plaintext is shown only once", body = TokenEnvelope),
        (status = 400, description = "Malformed JSON body", body = super::ErrorBody),
        (status = 401, description = "Unknown email or wrong password", body = super::ErrorBody),
        (status = 422, description = "Validation failed"),
        (status = 429, description = "Rate limit exceeded", body = super::ErrorBody)
    ),
    tag = "tokens"
)]
// Unknown email and wrong password share one 401 so accounts cannot be enumerated.
pub async fn create_authentication_token(
    Extension(state): Extension<ApiState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    let mut v = Validator::new();
    validate_email(&mut v, &request.email);
    validate_password(&mut v, &request.password);
    v.finish()?;

    let timeout = state.gateway.lookup_timeout();

    let user = match bounded(timeout, "user lookup", state.users.user_by_email(&request.email)).await
    {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            password::verify_decoy_blocking(request.password).await?;
            return Err(ApiError::InvalidCredentials);
        }
        Err(err) => return Err(err.into()),
    };

    let matches = password::verify_blocking(user.password_hash.clone(), request.password).await?;
    if !matches {
        debug!(user_id = %user.id, "password mismatch");
        return Err(ApiError::InvalidCredentials);
    }

    let credential = bounded(
        timeout,
        "token issue",
        state.gateway.tokens().issue(
            user.id,
            state.config.authentication_ttl(),
            TokenScope::Authentication,
        ),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(TokenEnvelope {
            authentication_token: credential,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/tokens/password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 202, description = "Reset token issued and its email queued", body = MessageEnvelope),
        (status = 400, description = "Malformed JSON body", body = super::ErrorBody),
        (status = 401, description = "Unknown email", body = super::ErrorBody),
        (status = 403, description = "Account not activated", body = super::ErrorBody),
        (status = 422, description = "Validation failed"),
        (status = 429, description = "Rate limit exceeded", body = super::ErrorBody)
    ),
    tag = "tokens"
)]
// The plaintext only travels in the queued email, never in the response.
pub async fn create_password_reset_token(
    Extension(state): Extension<ApiState>,
    payload: Result<Json<PasswordResetRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    let mut v = Validator::new();
    validate_email(&mut v, &request.email);
    v.finish()?;

    let timeout = state.gateway.lookup_timeout();

    let user = match bounded(timeout, "user lookup", state.users.user_by_email(&request.email)).await
    {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(ApiError::InvalidCredentials),
        Err(err) => return Err(err.into()),
    };

    if !user.activated {
        return Err(AdmissionError::InactiveAccount.into());
    }

    bounded(
        timeout,
        "password reset",
        state
            .users
            .request_password_reset(&user, state.config.password_reset_ttl()),
    )
    .await?;

    debug!(user_id = %user.id, "password reset email queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageEnvelope {
            message: PASSWORD_RESET_MESSAGE.to_string(),
        }),
    ))
}
