//! PDP HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router and defines the shared state injected into
//! handlers. Kept apart from `main` so tests can drive the router directly.
use crate::api;
use crate::bundle::PolicyLocation;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use warden_authz::DecisionEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
    pub policy: PolicyLocation,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(engine: Arc<DecisionEngine>, policy: PolicyLocation) -> Self {
        Self {
            engine,
            policy,
            http: reqwest::Client::new(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            )
        });

    Router::new()
        .route(
            "/v1/authorize",
            axum::routing::post(api::authorize::authorize),
        )
        .route("/v1/policy", axum::routing::get(api::policy::get_policy))
        .route(
            "/v1/policy/reload",
            axum::routing::post(api::policy::reload_policy),
        )
        .route(
            "/v1/keys",
            axum::routing::get(api::keys::get_keys).put(api::keys::put_keys),
        )
        .route(
            "/v1/cache",
            axum::routing::get(api::keys::cache_stats).delete(api::keys::clear_cache),
        )
        .layer(trace_layer)
        .with_state(state)
}
