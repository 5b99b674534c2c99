//! Error types and HTTP/RPC response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the control plane toolkit.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(Box<figment::Error>),

    /// No credentials were present on the request
    #[error("credentials not found")]
    CredentialsNotFound,

    /// Credentials were present but malformed or failed verification
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Credentials were valid but have expired
    #[error("credentials expired")]
    CredentialsExpired,

    /// No authenticator in the chain could authenticate the request
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Principal authenticated but lacks the permission for this action
    #[error("permission denied: {0}")]
    Forbidden(String),

    /// Rate limit exceeded
    #[error("rate limited")]
    RateLimited,

    /// Too many concurrent requests (semaphore exhausted)
    #[error("too many concurrent requests")]
    TooManyConcurrent,

    /// Operation did not complete before its deadline
    #[error("deadline exceeded")]
    Timeout,

    /// Saga or step execution failed
    #[error("saga error: {0}")]
    Saga(String),

    /// Scheduler error (job registration, lock acquisition, etc.)
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// External collaborator (KV, Counter, Locker, Publisher) failed
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// JWT error
    #[error("jwt error: {0}")]
    Jwt(Box<jsonwebtoken::errors::Error>),

    /// Password/API-key hashing error
    #[error("hashing error: {0}")]
    Hash(String),

    /// HTTP error
    #[error("http error: {0}")]
    Http(Box<axum::http::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Resource conflict (409)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),

    /// Generic / unclassified error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error represents a kind that retry middleware should
    /// consider retryable by default. Classification only - callers still
    /// combine this with their own `shouldRetry` predicate.
    pub fn is_retryable_default(&self) -> bool {
        matches!(
            self,
            Error::RateLimited
                | Error::TooManyConcurrent
                | Error::Timeout
                | Error::Collaborator(_)
                | Error::Internal(_)
        )
    }
}

/// Error response body returned to HTTP clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable error message
    pub error: String,

    /// Machine readable error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP status code mirrored into the body
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            status: status.as_u16(),
        }
    }

    pub fn with_code(status: StatusCode, code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            status: status.as_u16(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error {
    /// Map to an (HTTP status, error code) pair per the status table.
    fn http_parts(&self) -> (StatusCode, &'static str) {
        match self {
            Error::CredentialsNotFound => (StatusCode::UNAUTHORIZED, "credentials_not_found"),
            Error::InvalidCredentials(_) => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            Error::CredentialsExpired => (StatusCode::UNAUTHORIZED, "credentials_expired"),
            Error::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, "permission_denied"),
            Error::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "resource_exhausted"),
            Error::TooManyConcurrent => (StatusCode::SERVICE_UNAVAILABLE, "resource_exhausted"),
            Error::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "deadline_exceeded"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            Error::Saga(_) => (StatusCode::INTERNAL_SERVER_ERROR, "saga_error"),
            Error::Scheduler(_) => (StatusCode::INTERNAL_SERVER_ERROR, "scheduler_error"),
            Error::Collaborator(_) => (StatusCode::BAD_GATEWAY, "collaborator_error"),
            Error::Jwt(_) => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            Error::Hash(_) => (StatusCode::INTERNAL_SERVER_ERROR, "hash_error"),
            Error::Http(_) => (StatusCode::BAD_REQUEST, "http_error"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Error::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    /// Map to a `tonic::Status` for the RPC protocol adapter.
    pub fn to_rpc_status(&self) -> tonic::Status {
        let code = match self {
            Error::CredentialsNotFound
            | Error::InvalidCredentials(_)
            | Error::CredentialsExpired
            | Error::Unauthenticated(_)
            | Error::Jwt(_) => tonic::Code::Unauthenticated,
            Error::Forbidden(_) => tonic::Code::PermissionDenied,
            Error::RateLimited | Error::TooManyConcurrent => tonic::Code::ResourceExhausted,
            Error::Timeout => tonic::Code::DeadlineExceeded,
            Error::NotFound(_) => tonic::Code::NotFound,
            Error::BadRequest(_) => tonic::Code::InvalidArgument,
            Error::Conflict(_) => tonic::Code::Aborted,
            Error::Collaborator(_) => tonic::Code::Unavailable,
            _ => tonic::Code::Internal,
        };
        tonic::Status::new(code, self.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = self.http_parts();

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = ErrorResponse::with_code(status, code, self.to_string());
        (status, Json(body)).into_response()
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error::Jwt(Box::new(err))
    }
}

impl From<axum::http::Error> for Error {
    fn from(err: axum::http::Error) -> Self {
        Error::Http(Box::new(err))
    }
}

impl From<argon2::password_hash::Error> for Error {
    fn from(err: argon2::password_hash::Error) -> Self {
        Error::Hash(err.to_string())
    }
}
