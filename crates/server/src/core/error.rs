use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures of the identity collaborator.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("credential expired")]
    Expired,
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("identity backend error: {0}")]
    Backend(String),
}

/// Failures of the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store error: {0}")]
    Backend(String),
}

/// HTTP-facing error for the API layer.
#[derive(Debug)]
pub enum Error {
    // Auth Errors
    AuthFailNoToken,
    AuthFailTokenWrongFormat,
    AuthFailInvalidToken,
    AuthFailCtxNotInRequestExt,

    // Model Errors
    NotFound(&'static str),
    Forbidden(String),

    // Generic
    BadRequest(String),
    Internal(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Error::AuthFailNoToken => (StatusCode::UNAUTHORIZED, "No auth token found".to_string()),
            Error::AuthFailTokenWrongFormat => (
                StatusCode::UNAUTHORIZED,
                "Auth token wrong format".to_string(),
            ),
            Error::AuthFailInvalidToken => (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired token".to_string(),
            ),
            Error::AuthFailCtxNotInRequestExt => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Auth context missing".to_string(),
            ),
            Error::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            Error::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": {
                "message": error_message
            }
        }));

        (status, body).into_response()
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredential => Error::AuthFailNoToken,
            AuthError::InvalidCredential | AuthError::Expired | AuthError::UnknownUser(_) => {
                Error::AuthFailInvalidToken
            }
            AuthError::Backend(msg) => Error::Internal(msg),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Error::NotFound(what),
            StoreError::Forbidden(msg) => Error::Forbidden(msg),
            // Database details stay in the logs
            StoreError::Database(e) => {
                tracing::error!("[Store] Database error: {}", e);
                Error::Internal("Internal server error".to_string())
            }
            StoreError::Backend(msg) => Error::Internal(msg),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_maps_to_unauthorized() {
        let resp = Error::from(AuthError::Expired).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = Error::from(AuthError::MissingCredential).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_store_error_status_codes() {
        let resp = Error::from(StoreError::NotFound("Message")).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = Error::from(StoreError::Forbidden("nope".into())).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
