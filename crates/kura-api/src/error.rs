//! HTTP error mapping.

use axum::{http::StatusCode, response::IntoResponse, Json};
use tracing::error;

/// Errors returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Error raised by a repository or the hierarchy maintainer.
    #[error(transparent)]
    Core(#[from] kura_core::Error),

    /// Malformed request detected before reaching a repository.
    #[error("{0}")]
    BadRequest(String),

    /// Read that found nothing.
    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    /// Stable machine-readable code, matching `kura_core::Error::kind`.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Core(err) => err.kind(),
            ApiError::BadRequest(_) => "INVALID_INPUT",
            ApiError::NotFound(_) => "NOT_FOUND",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(err) if err.is_rejection() => StatusCode::CONFLICT,
            ApiError::Core(kura_core::Error::InvalidInput(_)) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Core(err) if err.kind() == "NOT_FOUND" => StatusCode::NOT_FOUND,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let code = self.code();
        if status.is_server_error() {
            error!(subsystem = "api", error_kind = code, error = %self, "Request failed");
        }

        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "code": code,
        }));

        (status, body).into_response()
    }
}
