//! `POST /v1/authorize`.
//!
//! # Key invariants
//! - The response body is always the decision, whatever the status.
//! - A missing token is not a client error; it is decided (and audited) as an
//!   invalid token.
use crate::api::error::{ApiError, api_validation_error};
use crate::api::types::AuthorizeRequest;
use crate::app::AppState;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use warden_authz::{Decision, DecisionReason};

pub(crate) async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AuthorizeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Decision>), ApiError> {
    let Json(body) = body.map_err(|rejection| api_validation_error(&rejection.body_text()))?;
    let token = body
        .token
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(&headers))
        .unwrap_or_default();
    let decision = state.engine.authorize(&token, &body.request).await;
    Ok((status_for(&decision), Json(decision)))
}

pub(crate) fn status_for(decision: &Decision) -> StatusCode {
    if decision.is_allowed() {
        return StatusCode::OK;
    }
    match decision.reason() {
        DecisionReason::InvalidToken => StatusCode::UNAUTHORIZED,
        _ => StatusCode::FORBIDDEN,
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
