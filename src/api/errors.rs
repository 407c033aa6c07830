// Maps `EngineError` to an HTTP response. Every variant keeps its message —
// none carry secret material, per `atoms::error`'s own house rule — so there
// is nothing to redact here, only a status code to pick.

use crate::atoms::error::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            EngineError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            EngineError::SignatureMismatch(_) => StatusCode::UNAUTHORIZED,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::ConfigMissing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::UpstreamFailure { .. } => StatusCode::BAD_GATEWAY,
            EngineError::Io(_) | EngineError::Database(_) | EngineError::Serialization(_) | EngineError::Network(_) | EngineError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
