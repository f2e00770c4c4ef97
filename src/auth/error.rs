use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::store::StoreError;

/// Outcomes of the authentication flows, one variant per distinct condition
/// the HTTP layer must be able to map.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("email already registered")]
    Conflict,
    #[error("not found")]
    NotFound,
    #[error("invalid credentials")]
    Unauthorized,
    #[error("code or token expired")]
    Expired,
    #[error("invalid code")]
    InvalidCode,
    #[error("invalid token")]
    InvalidToken,
    #[error("code was issued for a different flow")]
    PurposeMismatch,
    #[error("resend requested too soon")]
    Throttled,
    #[error("too many failed attempts, request a new code")]
    Locked,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => AuthError::Conflict,
            StoreError::NotFound => AuthError::NotFound,
            other => AuthError::Store(other),
        }
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Conflict => StatusCode::CONFLICT,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::Expired => StatusCode::GONE,
            AuthError::InvalidCode | AuthError::InvalidToken => StatusCode::BAD_REQUEST,
            AuthError::PurposeMismatch => StatusCode::CONFLICT,
            AuthError::Throttled => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Locked => StatusCode::LOCKED,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Store(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "auth operation failed");
        }
        // Internal details stay out of the response body.
        let message = if status.is_server_error() {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
