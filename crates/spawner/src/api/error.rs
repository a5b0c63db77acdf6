//! API error handling with plain-text responses.
//!
//! The edge router relays these bodies to browsers as-is, so they stay short
//! and free of internal detail.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn method_not_allowed(msg: impl Into<String>) -> Self {
        Self::MethodNotAllowed(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn body(&self) -> &str {
        match self {
            Self::BadRequest(msg)
            | Self::Forbidden(msg)
            | Self::MethodNotAllowed(msg)
            | Self::ServiceUnavailable(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 400/403 are expected traffic; only provisioning failures are logged.
        if status.is_server_error() {
            error!("API error: {}", self);
        }

        (status, self.body().to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_variants_to_status_and_plain_body() {
        let err = ApiError::bad_request("use /u/<id>");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body(), "use /u/<id>");

        assert_eq!(
            ApiError::forbidden("forbidden").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::method_not_allowed("method not allowed").status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ApiError::service_unavailable("session unavailable").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
