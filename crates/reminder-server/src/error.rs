use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reminder_core::RemindError;
use serde_json::json;

/// Wraps `RemindError` so handlers can `?`-propagate it straight into an
/// axum response without a manual match at every call site.
pub struct ApiError(pub RemindError);

impl From<RemindError> for ApiError {
    fn from(e: RemindError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            RemindError::Parse(_) | RemindError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RemindError::Auth(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            RemindError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RemindError::State { .. } => (StatusCode::CONFLICT, "invalid_state"),
            RemindError::Policy(_) => (StatusCode::BAD_REQUEST, "rejected"),
            RemindError::TransientDelivery(_)
            | RemindError::PermanentDelivery(_)
            | RemindError::Store(_)
            | RemindError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let body = Json(json!({ "error": code, "message": self.0.to_string() }));
        (status, body).into_response()
    }
}
