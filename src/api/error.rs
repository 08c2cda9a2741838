//! CoreError -> HTTP response mapping.

use crate::error::CoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

pub struct ApiError(pub CoreError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            CoreError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CoreError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            CoreError::NotConnected => (StatusCode::SERVICE_UNAVAILABLE, "not_connected"),
            CoreError::AdapterFailure { .. } => (StatusCode::BAD_GATEWAY, "adapter_failure"),
            CoreError::SchemaConflict { .. }
            | CoreError::InvalidPayload { .. }
            | CoreError::RecoveryAbort(_)
            | CoreError::SubscriberLag(_)
            | CoreError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = Json(json!({
            "error": kind,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
