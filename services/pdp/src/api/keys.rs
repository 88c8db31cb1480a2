//! Key rotation and claim-cache handlers.
use crate::api::error::{ApiError, api_key_material_error, api_validation_error};
use crate::api::types::{CacheSummary, KeysSummary};
use crate::app::AppState;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use warden_authz::{Jwks, KeySet};

pub(crate) async fn get_keys(State(state): State<AppState>) -> Json<KeysSummary> {
    Json(KeysSummary {
        kids: state.engine.key_set().kids().map(str::to_string).collect(),
    })
}

/// Replace the verification keys with the posted JWKS. Cached claims are
/// dropped by the rotation.
pub(crate) async fn put_keys(
    State(state): State<AppState>,
    body: Result<Json<Jwks>, JsonRejection>,
) -> Result<Json<KeysSummary>, ApiError> {
    let Json(jwks) = body.map_err(|rejection| api_validation_error(&rejection.body_text()))?;
    let keys = KeySet::from_jwks(&jwks).map_err(|err| api_key_material_error(&err.to_string()))?;
    let kids: Vec<String> = keys.kids().map(str::to_string).collect();
    state.engine.rotate_keys(keys);
    Ok(Json(KeysSummary { kids }))
}

pub(crate) async fn cache_stats(State(state): State<AppState>) -> Json<CacheSummary> {
    Json(CacheSummary::from(state.engine.cache_stats()))
}

pub(crate) async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    state.engine.clear_cache();
    StatusCode::NO_CONTENT
}
