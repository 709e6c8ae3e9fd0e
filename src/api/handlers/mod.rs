pub mod health;
pub mod tokens;
pub mod users;

use axum::{
    http::Method,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::ApiError;
use crate::gateway::credential::Credential;
use crate::gateway::identity::User;

/// Error envelope. Validation failures carry a field map instead of a string.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct UserEnvelope {
    pub user: User,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct TokenEnvelope {
    pub authentication_token: Credential,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PermissionsEnvelope {
    pub permissions: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageEnvelope {
    pub message: String,
}

// axum fallback for unknown routes
pub async fn not_found() -> Response {
    ApiError::NotFound.into_response()
}

// axum fallback for known routes hit with an unrouted method
pub async fn method_not_allowed(method: Method) -> Response {
    ApiError::MethodNotAllowed(method).into_response()
}
