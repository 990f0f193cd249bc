//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping internal errors to appropriate HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use cinematch_core::error::CinematchError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 404 Not Found - movie or poster does not exist.
    NotFound(String),
    /// 409 Conflict - the store refused a write.
    Conflict(String),
    /// 422 Unprocessable Entity - uploaded poster could not be embedded.
    UnreadableImage(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 503 Service Unavailable - backing store unreachable.
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnreadableImage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_code, message) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::NotFound(msg) => ("not_found", msg),
            ApiError::Conflict(msg) => ("conflict", msg),
            ApiError::UnreadableImage(msg) => ("unreadable_image", msg),
            ApiError::Internal(msg) => ("internal_error", msg),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, "{}", message);
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<CinematchError> for ApiError {
    fn from(err: CinematchError) -> Self {
        match err {
            CinematchError::NotFound(msg) => ApiError::NotFound(msg),
            CinematchError::Conflict(msg) => ApiError::Conflict(msg),
            CinematchError::Embedding(e) => ApiError::UnreadableImage(e.to_string()),
            CinematchError::Config(msg) | CinematchError::Validation(msg) => {
                ApiError::BadRequest(msg)
            }
            CinematchError::StoreUnavailable(msg) => ApiError::ServiceUnavailable(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinematch_core::error::EmbedError;

    #[test]
    fn test_error_mapping() {
        let cases = [
            (CinematchError::item_not_found("x"), StatusCode::NOT_FOUND),
            (CinematchError::Conflict("dup".into()), StatusCode::CONFLICT),
            (
                CinematchError::Embedding(EmbedError::Decode("bad".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (CinematchError::Validation("empty".into()), StatusCode::BAD_REQUEST),
            (CinematchError::Config("crop".into()), StatusCode::BAD_REQUEST),
            (
                CinematchError::StoreUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (CinematchError::Fetch("dns".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_unreadable_image_code() {
        let resp = ApiError::UnreadableImage("nope".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
