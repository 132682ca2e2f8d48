//! API error type mapping to HTTP status codes and the error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::error::GenerateError;

/// Errors returned by gateway handlers.
#[derive(Debug)]
pub enum ApiError {
    /// A generation or session failure.
    Generate(GenerateError),
    /// The request body or path was malformed.
    InvalidRequest(String),
}

impl From<GenerateError> for ApiError {
    fn from(e: GenerateError) -> Self {
        ApiError::Generate(e)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Generate(e) => write!(f, "{e}"),
            ApiError::InvalidRequest(msg) => f.write_str(msg),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Generate(GenerateError::MissingTemplate(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Generate(GenerateError::MissingVariable { .. })
            | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Generate(GenerateError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Generate(GenerateError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Generate(e) => e.code(),
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(code, %message, "Request failed");
        } else {
            tracing::debug!(code, %message, "Request rejected");
        }

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            })),
        )
            .into_response()
    }
}
