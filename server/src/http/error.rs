//! HTTP error responses.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;

use crate::Error;

/// Error wrapper for converting service errors to HTTP responses.
///
/// Field errors render as `{"field": ["message", ...]}`, everything else as
/// `{"detail": "message"}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Unauthenticated(_) | Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::MalformedBody(_) => StatusCode::BAD_REQUEST,
            Error::StorageConflict { .. } => StatusCode::CONFLICT,
            Error::Storage(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match self.0 {
            Error::Validation(fields) => (status, Json(fields)).into_response(),
            Error::Unauthenticated(e) => (
                status,
                [(header::WWW_AUTHENTICATE, r#"Bearer realm="api""#)],
                detail(e.to_string()),
            )
                .into_response(),
            Error::Storage(e) => {
                error!("Storage failure: {:?}", e);
                (status, detail("A server error occurred.".to_owned())).into_response()
            }
            Error::Internal(msg) => {
                error!("Internal error: {}", msg);
                (status, detail("A server error occurred.".to_owned())).into_response()
            }
            other => (status, detail(other.to_string())).into_response(),
        }
    }
}

fn detail(message: String) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "detail": message }))
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}
