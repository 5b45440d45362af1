//! Translates [`evalengine_core::error::Error`] into HTTP responses
//! (spec.md §7), grounded on the teacher's `gateway/src/error.rs`:
//! `impl IntoResponse for Error { self.log(); json!({"error": ...}) }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use evalengine_core::error::{Error, ErrorKind};
use serde_json::json;

/// Wraps the core error so this crate can provide its own `IntoResponse`
/// (the orphan rule forbids implementing it directly on the foreign type).
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

fn default_status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationFailure => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::StateConflict => StatusCode::BAD_REQUEST,
        ErrorKind::UpstreamFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::Cancelled => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = default_status_code(self.0.kind());
        log(&self.0, status);
        let body = json!({"error": self.0.to_string()});
        (status, Json(body)).into_response()
    }
}

/// The adversarial-config endpoints respond `422` on validation failure
/// instead of the general `400` (spec.md §6). Other error kinds fall back
/// to [`default_status_code`].
pub struct ConfigApiError(pub Error);

impl From<Error> for ConfigApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ConfigApiError {
    fn into_response(self) -> Response {
        let status = if self.0.kind() == ErrorKind::ValidationFailure {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            default_status_code(self.0.kind())
        };
        log(&self.0, status);
        let body = json!({"error": self.0.to_string()});
        (status, Json(body)).into_response()
    }
}

fn log(err: &Error, status: StatusCode) {
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::warn!(error = %err, "request rejected");
    }
}
