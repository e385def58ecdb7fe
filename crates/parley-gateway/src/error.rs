//! Gateway error types.

use crate::auth::AuthError;
use crate::protocol::ErrorCode;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parley_core::error::ValidationError;
use parley_store::StoreError;
use thiserror::Error;
use tracing::error;

/// Errors that can occur in the gateway.
///
/// Every variant is reported only to the connection (or HTTP caller) that
/// triggered it.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Empty or malformed payload.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The actor is not allowed to perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The edit window has elapsed.
    #[error("Expired: {0}")]
    Expired(String),

    /// The entity already transitioned to a state that rules this out.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The durable store failed; the caller may retry.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Missing or rejected credential.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Unexpected fault inside an operation.
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) | Self::Json(_) => ErrorCode::InvalidInput,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Expired(_) => ErrorCode::Expired,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
            Self::Unauthenticated(_) => ErrorCode::Unauthenticated,
            Self::Internal(_) | Self::Io(_) => ErrorCode::Internal,
        }
    }

    /// Only store outages are worth retrying; the gateway never retries itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Detail safe to show a client.
    pub fn detail(&self) -> String {
        match self {
            Self::InvalidInput(d)
            | Self::Forbidden(d)
            | Self::NotFound(d)
            | Self::Expired(d)
            | Self::Conflict(d)
            | Self::Unauthenticated(d) => d.clone(),
            Self::Json(e) => e.to_string(),
            Self::StoreUnavailable(_) => "message store unavailable, try again".to_string(),
            Self::Internal(_) | Self::Io(_) => "internal error".to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self.code() {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Expired => StatusCode::GONE,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationError> for GatewayError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Invalid(v) => Self::InvalidInput(v.to_string()),
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Corrupt(detail) => {
                error!(error = %detail, "Corrupt row in message store");
                Self::Internal(detail)
            }
            other => {
                error!(error = %other, "Message store call failed");
                Self::StoreUnavailable(other.to_string())
            }
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Store(store) => store.into(),
            other => Self::Unauthenticated(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.detail(),
                "retryable": self.is_retryable(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
