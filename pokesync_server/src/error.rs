use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pokesync_core::error as core_error;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Core(#[from] pokesync_core::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(err) => match err {
                core_error::Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                core_error::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                core_error::Error::NotFound(_)
                | core_error::Error::Store { .. }
                | core_error::Error::Fetch(_)
                | core_error::Error::DeadlineExceeded { .. }
                | core_error::Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Client-facing message. Server-side failures collapse to a generic
    /// message; the detail goes to the log only.
    fn public_message(&self) -> String {
        match self.status_code() {
            StatusCode::UNAUTHORIZED => "unauthorized".to_string(),
            code if code.is_server_error() => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(status = code.as_u16(), error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: self.public_message(),
        };
        (code, Json(body)).into_response()
    }
}
