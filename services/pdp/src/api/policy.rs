//! Policy inspection and reload handlers.
//!
//! # Key invariants
//! - A rejected bundle leaves the active rules untouched (the engine swaps
//!   atomically or not at all).
//! - An empty reload body means "reload from the configured location".
use crate::api::error::{
    ApiError, api_not_configured, api_policy_load_error, api_upstream_error,
    api_validation_error,
};
use crate::api::types::PolicySummary;
use crate::app::AppState;
use crate::bundle::source_for_body;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, header};

pub(crate) async fn get_policy(State(state): State<AppState>) -> Json<PolicySummary> {
    Json(PolicySummary::from(state.engine.active_rules().as_ref()))
}

pub(crate) async fn reload_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PolicySummary>, ApiError> {
    let source = if body.is_empty() {
        state
            .policy
            .fetch(&state.http)
            .await
            .map_err(|err| api_upstream_error(&format!("{err:#}")))?
            .ok_or_else(|| api_not_configured("no policy path or url configured"))?
    } else {
        let text = String::from_utf8(body.to_vec())
            .map_err(|_| api_validation_error("policy body must be utf-8"))?;
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        source_for_body(content_type, text)
    };
    let active = state
        .engine
        .reload(source)
        .map_err(|err| api_policy_load_error(&err.to_string()))?;
    Ok(Json(PolicySummary::from(active.as_ref())))
}
