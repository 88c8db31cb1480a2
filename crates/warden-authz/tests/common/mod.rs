#![allow(dead_code)]

use std::sync::Arc;
use warden_authz::{
    AuthorizationRequest, DecisionEngine, EngineSettings, KeySet, Method, PolicySource,
    SigningKey, TokenClaims, TokenIssuer, VerificationKey, ed25519_public_key,
};

pub const SEED: [u8; 32] = [8u8; 32];
pub const OTHER_SEED: [u8; 32] = [11u8; 32];
pub const ISSUER: &str = "warden-idp";
pub const AUDIENCE: &str = "warden";

pub const POLICY: &str = r#"
version: v1
rules:
  - name: tenant-isolation
    kind: tenant_isolation
    sources: ["frontend"]
    destinations: ["api"]
  - name: self-access
    kind: self_access
  - name: admin-override
    kind: admin_override
"#;

pub fn key_set(kid: &str, seed: &[u8; 32]) -> KeySet {
    KeySet::new(vec![
        VerificationKey::ed25519(kid, &ed25519_public_key(seed)).expect("verification key"),
    ])
    .expect("key set")
}

pub fn issuer(kid: &str, seed: &[u8; 32]) -> TokenIssuer {
    TokenIssuer::new(SigningKey::ed25519(kid, seed).expect("signing key"))
        .with_issuer(ISSUER)
        .with_audience(AUDIENCE)
}

pub fn mint(claims: TokenClaims) -> String {
    issuer("k1", &SEED).mint(&claims).expect("mint")
}

pub fn settings(cache_enabled: bool) -> EngineSettings {
    EngineSettings {
        issuer: Some(ISSUER.to_string()),
        audience: Some(AUDIENCE.to_string()),
        leeway: std::time::Duration::ZERO,
        cache_enabled,
        ..EngineSettings::default()
    }
}

pub fn engine_with_policy(cache_enabled: bool) -> Arc<DecisionEngine> {
    let engine = DecisionEngine::builder(key_set("k1", &SEED))
        .settings(settings(cache_enabled))
        .build();
    engine
        .reload(PolicySource::Yaml(POLICY.to_string()))
        .expect("load policy");
    Arc::new(engine)
}

pub fn get(path: &str) -> AuthorizationRequest {
    AuthorizationRequest::new(Method::Get, "api").with_path(path)
}

pub fn service_call(source: &str, destination: &str, tenant: &str) -> AuthorizationRequest {
    AuthorizationRequest::new(Method::Post, destination)
        .with_source(source)
        .with_path("/internal/sync")
        .with_label("tenant", tenant)
}
