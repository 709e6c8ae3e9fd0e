//! Handler-level errors rendered as `{"error": ...}` envelopes.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::error;

use crate::gateway::error::{AdmissionError, INTERNAL_MESSAGE, error_envelope};
use crate::gateway::password::PasswordError;
use crate::gateway::store::StoreError;

pub const NOT_FOUND_MESSAGE: &str = "the requested resource could not be found";
pub const EDIT_CONFLICT_MESSAGE: &str =
    "unable to update the record due to an edit conflict, please try again";
pub const INVALID_CREDENTIALS_MESSAGE: &str = "invalid authentication credentials";

/// Upper bound on request bodies read by the JSON extractor.
pub const MAX_BODY_BYTES: usize = 256_000;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("failed validation")]
    FailedValidation(BTreeMap<String, String>),
    #[error("invalid authentication credentials")]
    InvalidCredentials,
    #[error("edit conflict")]
    EditConflict,
    #[error("not found")]
    NotFound,
    #[error("the {0} method is not supported for this resource")]
    MethodNotAllowed(Method),
    #[error("request body too large")]
    PayloadTooLarge,
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Single-field validation failure.
    #[must_use]
    pub fn invalid(field: &str, message: &str) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), message.to_string());
        Self::FailedValidation(errors)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::EditConflict => Self::EditConflict,
            StoreError::DuplicateEmail => {
                Self::invalid("email", "a user with this email address already exists")
            }
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        Self::Internal(anyhow::Error::new(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::PayloadTooLarge;
        }
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => error_envelope(StatusCode::BAD_REQUEST, &message),
            Self::FailedValidation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": errors })),
            )
                .into_response(),
            Self::InvalidCredentials => {
                error_envelope(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS_MESSAGE)
            }
            Self::EditConflict => error_envelope(StatusCode::CONFLICT, EDIT_CONFLICT_MESSAGE),
            Self::NotFound => error_envelope(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE),
            Self::MethodNotAllowed(method) => error_envelope(
                StatusCode::METHOD_NOT_ALLOWED,
                &format!("the {method} method is not supported for this resource"),
            ),
            Self::PayloadTooLarge => error_envelope(
                StatusCode::PAYLOAD_TOO_LARGE,
                &format!("body must not be larger than {MAX_BODY_BYTES} bytes"),
            ),
            Self::Admission(err) => err.into_response(),
            Self::Internal(err) => {
                error!("Failed to handle request: {err:#}");
                error_envelope(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    async fn body_json(response: Response) -> anyhow::Result<serde_json::Value> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn validation_errors_are_keyed_by_field() -> anyhow::Result<()> {
        let response = ApiError::invalid("token", "must be provided").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await?;
        assert_eq!(body["error"]["token"], "must be provided");
        Ok(())
    }

    #[tokio::test]
    async fn store_errors_map_to_statuses() -> anyhow::Result<()> {
        let cases = [
            (StoreError::NotFound, StatusCode::NOT_FOUND),
            (StoreError::EditConflict, StatusCode::CONFLICT),
            (StoreError::DuplicateEmail, StatusCode::UNPROCESSABLE_ENTITY),
            (StoreError::Timeout("user lookup"), StatusCode::INTERNAL_SERVER_ERROR),
            (
                StoreError::Backend(anyhow!("connection refused")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
        }

        let body = body_json(ApiError::from(StoreError::Timeout("user lookup")).into_response()).await?;
        assert_eq!(body["error"], INTERNAL_MESSAGE);
        Ok(())
    }

    #[tokio::test]
    async fn method_not_allowed_names_the_method() -> anyhow::Result<()> {
        let response = ApiError::MethodNotAllowed(Method::DELETE).into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = body_json(response).await?;
        assert_eq!(
            body["error"],
            "the DELETE method is not supported for this resource"
        );
        Ok(())
    }

    #[tokio::test]
    async fn invalid_credentials_message() -> anyhow::Result<()> {
        let response = ApiError::InvalidCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await?;
        assert_eq!(body["error"], INVALID_CREDENTIALS_MESSAGE);
        Ok(())
    }
}
