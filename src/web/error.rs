// Error types for the API server

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Failures that abort a request. Domain-level failures (guider not connected,
/// no image data, ...) are not errors at this level; they are answered with
/// `200 {"success": false}` by the handlers.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    /// Unexpected failure. `message` is returned to the client, `cause` is only logged.
    Internal {
        message: &'static str,
        cause: String,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal { message, cause } => {
                tracing::error!("{}: {}", message, cause);
                (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
            }
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
