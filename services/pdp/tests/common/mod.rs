#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pdp::app::{AppState, build_router};
use pdp::bundle::PolicyLocation;
use std::net::SocketAddr;
use std::sync::Arc;
use warden_authz::{
    DecisionEngine, EngineSettings, Jwk, Jwks, KeySet, NoopAuditSink, PolicySource, SigningKey,
    TokenClaims, TokenIssuer, VerificationKey, ed25519_public_key,
};

pub const SEED: [u8; 32] = [21u8; 32];
pub const ROTATED_SEED: [u8; 32] = [22u8; 32];

pub const POLICY: &str = r#"
version: v1
rules:
  - name: self-access
    kind: self_access
  - name: admin-override
    kind: admin_override
"#;

pub fn jwks_for(kid: &str, seed: &[u8; 32]) -> Jwks {
    Jwks {
        keys: vec![Jwk::ed25519(
            kid,
            URL_SAFE_NO_PAD.encode(ed25519_public_key(seed)),
        )],
    }
}

pub fn mint(kid: &str, seed: &[u8; 32], claims: TokenClaims) -> String {
    TokenIssuer::new(SigningKey::ed25519(kid, seed).expect("signing key"))
        .mint(&claims)
        .expect("mint")
}

pub fn engine() -> Arc<DecisionEngine> {
    let keys = KeySet::new(vec![
        VerificationKey::ed25519("k1", &ed25519_public_key(&SEED)).expect("key"),
    ])
    .expect("key set");
    let engine = DecisionEngine::builder(keys)
        .settings(EngineSettings::default())
        .audit_sink(Arc::new(NoopAuditSink))
        .build();
    engine
        .reload(PolicySource::Yaml(POLICY.to_string()))
        .expect("load policy");
    Arc::new(engine)
}

pub fn router(engine: Arc<DecisionEngine>, policy: PolicyLocation) -> axum::Router {
    build_router(AppState::new(engine, policy))
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn text_request(method: &str, uri: &str, content_type: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", content_type)
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

/// Serves `app` on an ephemeral local port.
pub async fn serve(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    addr
}
