//! Warden policy decision engine.
//!
//! # Purpose
//! Answers "may this call proceed?" for service-to-service and end-user
//! requests. A decision combines a verified identity token with an ordered,
//! reloadable rule set and yields an auditable Allow/Deny.
//!
//! # How it fits
//! The `warden-pdp` service embeds [`DecisionEngine`] behind an HTTP callout
//! API; other services can embed it in-process the same way.
//!
//! # Key invariants
//! - Default deny. A request is allowed only when at least one rule matches.
//! - Fail closed. Any token problem denies with reason `InvalidToken` and the
//!   rules are never consulted.
//! - The claim cache is invisible in outcomes: warm, cold and disabled caches
//!   decide identically.
//! - Policy reloads and key rotations are atomic swaps; readers never see a
//!   partial state.
//!
//! # Important configuration
//! - Issuer/audience expectations must match what the identity provider mints.
//! - JWKS documents must publish only public key material.
//!
//! # Examples
//! ```rust
//! use warden_authz::{
//!     AuthorizationRequest, DecisionEngine, KeySet, Method, PolicySource, SigningKey,
//!     TokenClaims, TokenIssuer, VerificationKey, ed25519_public_key,
//! };
//!
//! # tokio_test_block_on(async {
//! let seed = [7u8; 32];
//! let keys = KeySet::new(vec![
//!     VerificationKey::ed25519("k1", &ed25519_public_key(&seed)).unwrap(),
//! ])
//! .unwrap();
//! let engine = DecisionEngine::builder(keys).build();
//! engine
//!     .reload(PolicySource::Yaml(
//!         "version: v1\nrules:\n  - name: self-access\n    kind: self_access\n".into(),
//!     ))
//!     .unwrap();
//!
//! let token = TokenIssuer::new(SigningKey::ed25519("k1", &seed).unwrap())
//!     .mint(&TokenClaims::new("u1", 300))
//!     .unwrap();
//! let request = AuthorizationRequest::new(Method::Get, "api").with_path("/api/v1/users/u1");
//! assert!(engine.authorize(&token, &request).await.is_allowed());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! # Common pitfalls
//! - Tokens with a `kid` are only checked against that key; publish new keys
//!   before issuers start using them, or configure a [`KeyResolver`].
//! - Self-access matches only the exact `prefix + [user_id]` path shape.

mod audit;
mod cache;
mod decision;
mod engine;
mod errors;
mod evaluator;
mod fingerprint;
mod jwks;
mod matcher;
mod policy;
mod registry;
mod request;
mod rule;
mod token;

pub use audit::{AuditRecord, AuditSink, ChannelAuditSink, ClaimsSource, NoopAuditSink, TracingAuditSink};
pub use cache::{
    CacheStats, ClaimCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, DisabledClaimCache,
    LruClaimCache,
};
pub use decision::{Decision, DecisionReason, Outcome};
pub use engine::{
    DEFAULT_KEY_LOOKUP_TIMEOUT, DEFAULT_LEEWAY, DecisionEngine, DecisionEngineBuilder,
    EngineSettings, KeyResolver,
};
pub use errors::{AuthzError, AuthzResult, TokenRejection};
pub use evaluator::RuleEvaluator;
pub use fingerprint::TokenFingerprint;
pub use jwks::{Jwk, Jwks, KeyUse};
pub use matcher::{WorkloadPatterns, wildcard_match};
pub use policy::{PolicyDocument, PolicySource, RuleCatalog, RuleDocument, RuleFactory};
pub use registry::{EMPTY_VERSION, RuleRegistry, RuleSet};
pub use request::{AuthorizationRequest, Method, split_path};
pub use rule::{
    ADMIN_OVERRIDE, AdminOverrideRule, DEFAULT_ADMIN_ROLE, DEFAULT_TENANT_LABEL, Effect, FnRule,
    Rule, SELF_ACCESS, SelfAccessRule, TENANT_ISOLATION, TenantIsolationRule,
};
pub use token::{
    ClaimSet, DEFAULT_ROLE, KeySet, SigningKey, TokenClaims, TokenIssuer, TokenVerifier,
    VerificationKey, VerifierSettings, ed25519_public_key, token_kid,
};
