//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Keeps every PDP error response in one JSON shape, `{code, message}`.
//!
//! # Key invariants and assumptions
//! - `code` is stable and machine-readable; `message` is for humans.
//! - Authorization outcomes are not errors. A deny is a 401/403 carrying the
//!   decision body, built by the authorize handler, never by these helpers.
use crate::api::types::ErrorResponse;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
        },
    }
}

/// 400 for malformed or unusable client input.
pub fn api_validation_error(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// 422 for a policy bundle the engine refused. The previous rules stay active.
pub fn api_policy_load_error(message: &str) -> ApiError {
    api_error(
        StatusCode::UNPROCESSABLE_ENTITY,
        "policy_load_error",
        message,
    )
}

/// 400 for a JWKS document that yields no usable verification key.
pub fn api_key_material_error(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "key_material_error", message)
}

/// 502 when a configured upstream (policy URL) could not be fetched.
pub fn api_upstream_error(message: &str) -> ApiError {
    tracing::warn!(error = message, "upstream fetch failed");
    api_error(StatusCode::BAD_GATEWAY, "upstream_error", message)
}

pub fn api_not_configured(message: &str) -> ApiError {
    api_error(StatusCode::CONFLICT, "not_configured", message)
}
