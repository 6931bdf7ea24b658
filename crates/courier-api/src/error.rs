//! HTTP error mapping for the REST surface.
//!
//! Broker errors translate to status codes; every error body is a JSON
//! envelope with a `detail` field, which is what SDK clients parse.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courier_core::CoreError;
use serde_json::json;
use tracing::error;

/// API-level error carrying the HTTP representation of a broker failure.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    /// Creates an error with an explicit status and detail message.
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self { status, detail: detail.into() }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidAckToken => StatusCode::CONFLICT,
            CoreError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CoreError::ConstraintViolation(_) => StatusCode::CONFLICT,
            CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "request failed on storage");
            // Storage details stay in the logs.
            return Self::new(status, "internal error");
        }

        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_error_taxonomy() {
        assert_eq!(
            ApiError::from(CoreError::NotFound("queue x".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::from(CoreError::InvalidAckToken).status, StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(CoreError::InvalidInput("bad".into())).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(CoreError::Storage("db down".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn storage_details_are_not_leaked() {
        let err = ApiError::from(CoreError::Storage("password=hunter2".into()));
        assert_eq!(err.detail, "internal error");
    }
}
