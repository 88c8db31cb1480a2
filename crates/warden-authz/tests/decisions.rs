//! End-to-end decision scenarios through the engine facade.
//!
//! # Purpose
//! Exercise `authorize` and `reload` the way an embedding service would:
//! minted tokens, a YAML policy bundle, and the built-in rule catalog.
//!
//! # Key invariants
//! - Default deny and OR semantics over the active rule set.
//! - Token failures deny with `InvalidToken` whatever the rules say.
//! - Faults inside the engine deny with `InternalError` and are audited.
mod common;

use common::*;
use std::sync::Arc;
use warden_authz::{
    AuthzError, AuthzResult, CacheStats, ChannelAuditSink, ClaimCache, ClaimSet, DecisionEngine,
    DecisionReason, FnRule, Outcome, PolicySource, Rule, TokenClaims, TokenFingerprint,
};

#[tokio::test]
async fn tenant_isolation_allows_same_tenant_service_call() {
    let engine = engine_with_policy(true);
    let token = mint(TokenClaims::new("svc-frontend", 600).tenant("acme"));

    let decision = engine
        .authorize(&token, &service_call("frontend", "api", "acme"))
        .await;
    assert_eq!(decision.outcome(), Outcome::Allow);
    assert_eq!(decision.matched_rule(), Some("tenant-isolation"));

    let cross_tenant = engine
        .authorize(&token, &service_call("frontend", "api", "globex"))
        .await;
    assert_eq!(cross_tenant.outcome(), Outcome::Deny);
    assert_eq!(cross_tenant.reason(), DecisionReason::NoMatchingRule);
}

#[tokio::test]
async fn self_access_allows_own_profile() {
    let engine = engine_with_policy(true);
    let token = mint(TokenClaims::new("u1", 600));
    let decision = engine.authorize(&token, &get("/api/v1/users/u1")).await;
    assert!(decision.is_allowed());
    assert_eq!(decision.matched_rule(), Some("self-access"));
}

#[tokio::test]
async fn admin_override_allows_any_profile() {
    let engine = engine_with_policy(true);
    let token = mint(TokenClaims::new("root", 600).role("admin"));
    let decision = engine.authorize(&token, &get("/api/v1/users/u99")).await;
    assert!(decision.is_allowed());
    assert_eq!(decision.matched_rule(), Some("admin-override"));
}

#[tokio::test]
async fn user_cannot_read_another_profile() {
    let engine = engine_with_policy(true);
    let token = mint(TokenClaims::new("u1", 600).role("user"));
    let decision = engine.authorize(&token, &get("/api/v1/users/u2")).await;
    assert_eq!(decision.outcome(), Outcome::Deny);
    assert_eq!(decision.matched_rule(), None);
    assert_eq!(decision.reason(), DecisionReason::NoMatchingRule);
}

#[tokio::test]
async fn expired_token_is_invalid() {
    let engine = engine_with_policy(true);
    let token = mint(TokenClaims::new("u1", -60));
    let decision = engine.authorize(&token, &get("/api/v1/users/u1")).await;
    assert_eq!(decision.outcome(), Outcome::Deny);
    assert_eq!(decision.reason(), DecisionReason::InvalidToken);
}

#[tokio::test]
async fn malformed_bundle_keeps_previous_rules() {
    let engine = engine_with_policy(true);
    let before = engine.active_rules();

    let err = engine
        .reload(PolicySource::Yaml(
            "version: v2\nrules:\n  - name: x\n    kind: not_a_kind\n".to_string(),
        ))
        .expect_err("unknown kind");
    assert!(matches!(err, AuthzError::PolicyLoad(_)));

    let after = engine.active_rules();
    assert_eq!(after.version(), "v1");
    assert_eq!(after.generation(), before.generation());

    let token = mint(TokenClaims::new("u1", 600));
    assert!(engine.authorize(&token, &get("/api/v1/users/u1")).await.is_allowed());
}

#[tokio::test]
async fn empty_rule_set_denies_everything() {
    let engine = DecisionEngine::builder(key_set("k1", &SEED))
        .settings(settings(true))
        .build();
    let token = mint(TokenClaims::new("root", 600).role("admin"));
    for request in [
        get("/api/v1/users/root"),
        get("/api/v1/users/u2"),
        service_call("frontend", "api", "acme"),
    ] {
        let decision = engine.authorize(&token, &request).await;
        assert_eq!(decision.reason(), DecisionReason::NoMatchingRule);
    }
}

#[tokio::test]
async fn adding_an_always_true_rule_flips_to_allow() {
    let engine = engine_with_policy(true);
    let token = mint(TokenClaims::new("u1", 600));
    let request = get("/api/v1/users/u2");
    assert!(!engine.authorize(&token, &request).await.is_allowed());

    let rules: Vec<Arc<dyn Rule>> = vec![Arc::new(FnRule::new("always", |_, _| Ok(true)))];
    engine
        .reload(PolicySource::Rules {
            version: "v2".to_string(),
            rules,
        })
        .expect("reload");
    let decision = engine.authorize(&token, &request).await;
    assert!(decision.is_allowed());
    assert_eq!(decision.matched_rule(), Some("always"));
}

#[tokio::test]
async fn bad_signature_denies_even_with_always_true_rule() {
    let engine = engine_with_policy(true);
    let rules: Vec<Arc<dyn Rule>> = vec![Arc::new(FnRule::new("always", |_, _| Ok(true)))];
    engine
        .reload(PolicySource::Rules {
            version: "open".to_string(),
            rules,
        })
        .expect("reload");

    // Signed with the right kid but the wrong key.
    let forged = issuer("k1", &OTHER_SEED)
        .mint(&TokenClaims::new("u1", 600))
        .expect("mint");
    let decision = engine.authorize(&forged, &get("/")).await;
    assert_eq!(decision.reason(), DecisionReason::InvalidToken);

    let expired = mint(TokenClaims::new("u1", -60));
    let decision = engine.authorize(&expired, &get("/")).await;
    assert_eq!(decision.reason(), DecisionReason::InvalidToken);

    let decision = engine.authorize("", &get("/")).await;
    assert_eq!(decision.reason(), DecisionReason::InvalidToken);
}

#[tokio::test]
async fn custom_rule_kind_loads_from_bundle() {
    let engine = DecisionEngine::builder(key_set("k1", &SEED))
        .settings(settings(true))
        .rule_kind(
            "verified_email",
            Arc::new(|name: &str, _params: &serde_json::Value| -> AuthzResult<Arc<dyn Rule>> {
                Ok(Arc::new(FnRule::new(name, |_, claims| Ok(claims.email_verified()))))
            }),
        )
        .build();
    engine
        .reload(PolicySource::Json(
            r#"{"version":"v1","rules":[{"name":"verified","kind":"verified_email"}]}"#.to_string(),
        ))
        .expect("reload");

    let verified = mint(TokenClaims::new("u1", 600).email_verified(true));
    let unverified = mint(TokenClaims::new("u2", 600));
    assert!(engine.authorize(&verified, &get("/")).await.is_allowed());
    assert!(!engine.authorize(&unverified, &get("/")).await.is_allowed());
}

struct FailingCache;

impl ClaimCache for FailingCache {
    fn get(&self, _fingerprint: &TokenFingerprint) -> AuthzResult<Option<Arc<ClaimSet>>> {
        Err(AuthzError::Cache("backend offline".to_string()))
    }

    fn put(&self, _fingerprint: TokenFingerprint, _claims: Arc<ClaimSet>) -> AuthzResult<()> {
        Err(AuthzError::Cache("backend offline".to_string()))
    }

    fn invalidate(&self, _fingerprint: &TokenFingerprint) {}

    fn clear(&self) {}

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

#[tokio::test]
async fn cache_errors_degrade_to_verification() {
    let engine = DecisionEngine::builder(key_set("k1", &SEED))
        .settings(settings(true))
        .claim_cache(Arc::new(FailingCache))
        .build();
    engine
        .reload(PolicySource::Yaml(POLICY.to_string()))
        .expect("reload");
    let token = mint(TokenClaims::new("u1", 600));
    assert!(engine.authorize(&token, &get("/api/v1/users/u1")).await.is_allowed());
    assert!(!engine.authorize(&token, &get("/api/v1/users/u2")).await.is_allowed());
}

struct PanickingCache;

impl ClaimCache for PanickingCache {
    fn get(&self, _fingerprint: &TokenFingerprint) -> AuthzResult<Option<Arc<ClaimSet>>> {
        panic!("cache corrupted")
    }

    fn put(&self, _fingerprint: TokenFingerprint, _claims: Arc<ClaimSet>) -> AuthzResult<()> {
        Ok(())
    }

    fn invalidate(&self, _fingerprint: &TokenFingerprint) {}

    fn clear(&self) {}

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

#[tokio::test]
async fn internal_fault_denies_and_is_audited() {
    let (sink, mut rx) = ChannelAuditSink::new(4);
    let engine = DecisionEngine::builder(key_set("k1", &SEED))
        .settings(settings(true))
        .claim_cache(Arc::new(PanickingCache))
        .audit_sink(Arc::new(sink))
        .build();
    engine
        .reload(PolicySource::Yaml(POLICY.to_string()))
        .expect("reload");

    let token = mint(TokenClaims::new("u1", 600));
    let decision = engine.authorize(&token, &get("/api/v1/users/u1")).await;
    assert_eq!(decision.outcome(), Outcome::Deny);
    assert_eq!(decision.reason(), DecisionReason::InternalError);

    let record = rx.recv().await.expect("audit record");
    assert!(record.internal_error);
    assert_eq!(record.reason, DecisionReason::InternalError);
    assert_eq!(record.destination_workload, "api");
}

#[tokio::test]
async fn every_call_emits_one_audit_record() {
    let (sink, mut rx) = ChannelAuditSink::new(16);
    let engine = DecisionEngine::builder(key_set("k1", &SEED))
        .settings(settings(true))
        .audit_sink(Arc::new(sink))
        .build();
    engine
        .reload(PolicySource::Yaml(POLICY.to_string()))
        .expect("reload");
    let token = mint(TokenClaims::new("u1", 600).tenant("acme"));

    engine.authorize(&token, &get("/api/v1/users/u1")).await;
    engine.authorize(&token, &get("/api/v1/users/u2")).await;
    engine.authorize("bogus", &get("/api/v1/users/u1")).await;

    let mut outcomes = Vec::new();
    while let Ok(record) = rx.try_recv() {
        outcomes.push((record.outcome, record.reason));
    }
    assert_eq!(
        outcomes,
        vec![
            (Outcome::Allow, DecisionReason::RuleMatched),
            (Outcome::Deny, DecisionReason::NoMatchingRule),
            (Outcome::Deny, DecisionReason::InvalidToken),
        ]
    );
}
