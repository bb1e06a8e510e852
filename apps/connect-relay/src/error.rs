use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use connect_protocol::{ApiErrorBody, SessionCode};
use thiserror::Error;
use tracing::error;

use crate::identity::IdentityError;

/// Failures of the backing store. Surfaced generically and never retried
/// here; `send` and `poll` are safe for callers to retry.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Unauthenticated(#[from] IdentityError),
    #[error("not permitted: {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("mailbox for {0} is full")]
    MailboxFull(SessionCode),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            RelayError::Forbidden(_) => StatusCode::FORBIDDEN,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::ResourceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::MailboxFull(_) => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Store(_) | RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "bad_request",
            RelayError::Unauthenticated(_) => "unauthorized",
            RelayError::Forbidden(_) => "forbidden",
            RelayError::NotFound(_) => "not_found",
            RelayError::ResourceExhausted(_) => "resource_exhausted",
            RelayError::MailboxFull(_) => "mailbox_full",
            RelayError::Store(_) => "store_error",
            RelayError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if matches!(self, RelayError::Store(_) | RelayError::Internal(_)) {
            error!(error = %self, "request failed");
            None
        } else {
            Some(self.to_string())
        };
        let body = ApiErrorBody {
            error: self.label().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
