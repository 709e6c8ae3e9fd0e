//! Admission verdicts and their HTTP mapping.
//!
//! Expired, malformed and unknown tokens all collapse into
//! [`AdmissionError::InvalidCredential`] so callers cannot learn why a token
//! failed.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

pub const INTERNAL_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("invalid or missing authentication token")]
    InvalidCredential,
    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,
    #[error("your user account must be activated to access this resource")]
    InactiveAccount,
    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AdmissionError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidCredential | Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::InactiveAccount | Self::NotPermitted => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Internal details never leave the server.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Internal(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

/// `{"error": "<message>"}` with the given status.
pub fn error_envelope(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("Admission failed: {err:#}");
        }

        let mut response = error_envelope(self.status(), &self.message());
        if matches!(self, Self::InvalidCredential) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
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

    #[test]
    fn verdicts_map_to_statuses() {
        assert_eq!(AdmissionError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AdmissionError::InvalidCredential.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AdmissionError::AuthenticationRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AdmissionError::InactiveAccount.status(), StatusCode::FORBIDDEN);
        assert_eq!(AdmissionError::NotPermitted.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AdmissionError::Internal(anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn invalid_credential_challenges_bearer() -> anyhow::Result<()> {
        let response = AdmissionError::InvalidCredential.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE),
            Some(&HeaderValue::from_static("Bearer"))
        );
        let body = body_json(response).await?;
        assert_eq!(body["error"], "invalid or missing authentication token");
        Ok(())
    }

    #[tokio::test]
    async fn internal_errors_hide_details() -> anyhow::Result<()> {
        let response = AdmissionError::Internal(anyhow!("pool exhausted: 10.0.0.5")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        let body = body_json(response).await?;
        assert_eq!(body["error"], INTERNAL_MESSAGE);
        Ok(())
    }
}
