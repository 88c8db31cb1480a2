//! Decision engine facade.
//!
//! # Purpose
//! Orchestrates claim lookup, token verification, rule evaluation and audit for
//! a single `authorize` call, and owns the reloadable policy and key state.
//!
//! # How it fits
//! ```text
//! authorize(token, request)
//!   -> claim cache (hit) ------------------------------+
//!   -> verify (miss) -> populate cache ----------------+-> evaluate -> audit -> Decision
//!   -> verify fails -> Deny(InvalidToken) -> audit -> Decision
//! ```
//!
//! # Key invariants
//! - Rules never run without a verified [`ClaimSet`].
//! - `authorize` never returns an error and never propagates a panic. Faults
//!   become `Deny` with reason `InternalError`.
//! - Cache failures degrade to a miss; they never change a decision.
//! - Every call emits exactly one audit record.
//!
//! # Concurrency model
//! `authorize` takes `&self` and runs concurrently. Policy reloads and key
//! rotations are single atomic publishes, so dropping an in-flight
//! `authorize` future leaves nothing half-updated.
//! Cached claims are served only while the verifier's key epoch still equals
//! the one they were verified under, so an insert that lands after a
//! rotation's `clear` is never returned.
//!
//! # Important configuration
//! - `key_lookup_timeout` bounds the [`KeyResolver`] call made for unknown
//!   `kid`s. A timeout rejects the token.
//! - `cache_ttl` is capped per entry by the token's own `exp`.
use crate::audit::{AuditRecord, AuditSink, ClaimsSource, TracingAuditSink};
use crate::cache::{
    CacheStats, ClaimCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, DisabledClaimCache,
    LruClaimCache,
};
use crate::decision::{Decision, DecisionReason};
use crate::errors::{AuthzError, AuthzResult, TokenRejection};
use crate::evaluator::{RuleEvaluator, panic_message};
use crate::fingerprint::TokenFingerprint;
use crate::policy::{PolicySource, RuleCatalog, RuleFactory};
use crate::registry::{RuleRegistry, RuleSet};
use crate::request::AuthorizationRequest;
use crate::token::{ClaimSet, KeySet, TokenVerifier, VerifierSettings, token_kid};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_LEEWAY: Duration = Duration::ZERO;
pub const DEFAULT_KEY_LOOKUP_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Clock skew tolerated on `exp`. Zero unless an operator opts in.
    pub leeway: Duration,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub key_lookup_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            leeway: DEFAULT_LEEWAY,
            cache_enabled: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            key_lookup_timeout: DEFAULT_KEY_LOOKUP_TIMEOUT,
        }
    }
}

/// Fetches key material for a `kid` the active key set does not know.
///
/// Returns the complete replacement key set, not just the missing key.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, kid: Option<&str>) -> AuthzResult<KeySet>;
}

pub struct DecisionEngineBuilder {
    keys: KeySet,
    settings: EngineSettings,
    audit: Option<Arc<dyn AuditSink>>,
    resolver: Option<Arc<dyn KeyResolver>>,
    cache: Option<Arc<dyn ClaimCache>>,
    catalog: RuleCatalog,
}

impl DecisionEngineBuilder {
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn key_resolver(mut self, resolver: Arc<dyn KeyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Overrides the cache chosen from [`EngineSettings`].
    pub fn claim_cache(mut self, cache: Arc<dyn ClaimCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register a custom rule kind for policy bundles.
    pub fn rule_kind(mut self, kind: impl Into<String>, factory: RuleFactory) -> Self {
        self.catalog.register(kind, factory);
        self
    }

    pub fn build(self) -> DecisionEngine {
        let settings = self.settings;
        let cache: Arc<dyn ClaimCache> = match self.cache {
            Some(cache) => cache,
            None if settings.cache_enabled => Arc::new(LruClaimCache::new(
                settings.cache_capacity,
                settings.cache_ttl,
            )),
            None => Arc::new(DisabledClaimCache::default()),
        };
        let verifier = TokenVerifier::new(
            VerifierSettings {
                issuer: settings.issuer.clone(),
                audience: settings.audience.clone(),
                leeway_secs: settings.leeway.as_secs(),
            },
            self.keys,
        );
        DecisionEngine {
            verifier,
            cache,
            registry: RuleRegistry::new(),
            evaluator: RuleEvaluator,
            catalog: self.catalog,
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            resolver: self.resolver,
            key_lookup_timeout: settings.key_lookup_timeout,
        }
    }
}

pub struct DecisionEngine {
    verifier: TokenVerifier,
    cache: Arc<dyn ClaimCache>,
    registry: RuleRegistry,
    evaluator: RuleEvaluator,
    catalog: RuleCatalog,
    audit: Arc<dyn AuditSink>,
    resolver: Option<Arc<dyn KeyResolver>>,
    key_lookup_timeout: Duration,
}

struct Verdict {
    decision: Decision,
    claims: Option<Arc<ClaimSet>>,
    source: ClaimsSource,
}

impl DecisionEngine {
    pub fn builder(keys: KeySet) -> DecisionEngineBuilder {
        DecisionEngineBuilder {
            keys,
            settings: EngineSettings::default(),
            audit: None,
            resolver: None,
            cache: None,
            catalog: RuleCatalog::with_builtins(),
        }
    }

    /// Decide whether `request`, presented with `token`, is allowed.
    pub async fn authorize(&self, token: &str, request: &AuthorizationRequest) -> Decision {
        let started = Instant::now();
        let (outcome, internal_error) = match AssertUnwindSafe(self.decide(token, request))
            .catch_unwind()
            .await
        {
            Ok(outcome) => (outcome, false),
            Err(panic) => {
                tracing::error!(
                    destination = %request.destination_workload(),
                    panic = %panic_message(panic.as_ref()),
                    "authorization faulted; denying"
                );
                (
                    Verdict {
                        decision: Decision::deny(DecisionReason::InternalError),
                        claims: None,
                        source: ClaimsSource::None,
                    },
                    true,
                )
            }
        };
        self.finish(outcome, request, started, internal_error)
    }

    async fn decide(&self, token: &str, request: &AuthorizationRequest) -> Verdict {
        let fingerprint = TokenFingerprint::of(token);
        let (claims, source) = match self.claims_for(token, &fingerprint).await {
            Ok(found) => found,
            Err(err) => {
                tracing::debug!(
                    fingerprint = %fingerprint.short(),
                    rejection = err.rejection().map(TokenRejection::as_str).unwrap_or("other"),
                    "token rejected"
                );
                return Verdict {
                    decision: Decision::deny(DecisionReason::InvalidToken),
                    claims: None,
                    source: ClaimsSource::None,
                };
            }
        };
        let rules = self.registry.active_rules();
        let decision = self.evaluator.evaluate(request, &claims, &rules);
        Verdict {
            decision,
            claims: Some(claims),
            source,
        }
    }

    async fn claims_for(
        &self,
        token: &str,
        fingerprint: &TokenFingerprint,
    ) -> AuthzResult<(Arc<ClaimSet>, ClaimsSource)> {
        match self.cache.get(fingerprint) {
            Ok(Some(claims)) if claims.key_epoch() == self.verifier.key_epoch() => {
                metrics::counter!("warden_claim_cache_lookups_total", "result" => "hit")
                    .increment(1);
                return Ok((claims, ClaimsSource::Cache));
            }
            // Verified before the last rotation; its insert lost the race with `clear`.
            Ok(Some(_)) => {
                tracing::debug!(
                    fingerprint = %fingerprint.short(),
                    "cached claims predate key rotation; verifying token"
                );
                metrics::counter!("warden_claim_cache_lookups_total", "result" => "stale")
                    .increment(1);
                self.cache.invalidate(fingerprint);
            }
            Ok(None) => {
                metrics::counter!("warden_claim_cache_lookups_total", "result" => "miss")
                    .increment(1);
            }
            Err(err) => {
                tracing::warn!(error = %err, "claim cache lookup failed; verifying token");
                metrics::counter!("warden_claim_cache_lookups_total", "result" => "error")
                    .increment(1);
            }
        }

        let claims = Arc::new(self.verify(token).await?);
        if claims.key_epoch() != self.verifier.key_epoch() {
            return Ok((claims, ClaimsSource::Verified));
        }
        if let Err(err) = self.cache.put(*fingerprint, claims.clone()) {
            tracing::warn!(error = %err, "claim cache insert failed");
        }
        Ok((claims, ClaimsSource::Verified))
    }

    async fn verify(&self, token: &str) -> AuthzResult<ClaimSet> {
        let err = match self.verifier.verify(token) {
            Ok(claims) => return Ok(claims),
            Err(err) => err,
        };
        let Some(resolver) = self.resolver.as_ref() else {
            return Err(err);
        };
        if err.rejection() != Some(TokenRejection::UnknownKey) {
            return Err(err);
        }

        let kid = token_kid(token);
        let lookup = tokio::time::timeout(self.key_lookup_timeout, resolver.resolve(kid.as_deref()));
        let keys = match lookup.await {
            Ok(Ok(keys)) => keys,
            Ok(Err(err)) => {
                tracing::warn!(kid = ?kid, error = %err, "key lookup failed");
                return Err(AuthzError::InvalidToken(TokenRejection::KeyLookupFailed));
            }
            Err(_) => {
                tracing::warn!(
                    kid = ?kid,
                    timeout_ms = self.key_lookup_timeout.as_millis() as u64,
                    "key lookup timed out"
                );
                return Err(AuthzError::InvalidToken(TokenRejection::KeyLookupTimeout));
            }
        };
        if let Some(kid) = kid.as_deref()
            && !keys.contains(kid)
        {
            return Err(AuthzError::InvalidToken(TokenRejection::UnknownKey));
        }
        self.rotate_keys(keys);
        self.verifier.verify(token)
    }

    fn finish(
        &self,
        outcome: Verdict,
        request: &AuthorizationRequest,
        started: Instant,
        internal_error: bool,
    ) -> Decision {
        let Verdict {
            decision,
            claims,
            source,
        } = outcome;
        metrics::counter!(
            "warden_decisions_total",
            "outcome" => decision.outcome().as_str(),
            "reason" => decision.reason().as_str()
        )
        .increment(1);
        tracing::debug!(
            destination = %request.destination_workload(),
            outcome = decision.outcome().as_str(),
            matched_rule = decision.matched_rule().unwrap_or(""),
            reason = decision.reason().as_str(),
            "authorization decided"
        );

        let record = AuditRecord {
            timestamp_ms: AuditRecord::now_ms(),
            subject: claims.as_ref().map(|claims| claims.subject().to_string()),
            tenant: claims
                .as_ref()
                .and_then(|claims| claims.tenant().map(str::to_string)),
            destination_workload: request.destination_workload().to_string(),
            outcome: decision.outcome(),
            matched_rule: decision.matched_rule().map(str::to_string),
            reason: decision.reason(),
            claims_source: source,
            internal_error,
            duration_us: started.elapsed().as_micros() as u64,
        };
        // A faulty sink must not take the decision down with it.
        if std::panic::catch_unwind(AssertUnwindSafe(|| self.audit.record(record))).is_err() {
            tracing::warn!("audit sink panicked; record lost");
        }
        decision
    }

    /// Replace the active rules from `source`. On error the previous rules stay
    /// in force.
    pub fn reload(&self, source: PolicySource) -> AuthzResult<Arc<RuleSet>> {
        match self.catalog.resolve(source) {
            Ok((version, rules)) => {
                let active = self.registry.load(version, rules);
                tracing::info!(
                    version = %active.version(),
                    generation = active.generation(),
                    rules = active.len(),
                    "policy loaded"
                );
                metrics::counter!("warden_policy_reloads_total", "result" => "ok").increment(1);
                Ok(active)
            }
            Err(err) => {
                let current = self.registry.active_rules();
                tracing::warn!(
                    error = %err,
                    version = %current.version(),
                    "policy reload rejected; keeping current rules"
                );
                metrics::counter!("warden_policy_reloads_total", "result" => "error")
                    .increment(1);
                Err(err)
            }
        }
    }

    /// Install a new key set. Cached claims are dropped so nothing verified
    /// under a retired key is served again.
    pub fn rotate_keys(&self, keys: KeySet) {
        let count = keys.len();
        self.verifier.rotate_keys(keys);
        self.cache.clear();
        tracing::info!(keys = count, "verification keys rotated");
        metrics::counter!("warden_key_rotations_total").increment(1);
    }

    pub fn active_rules(&self) -> Arc<RuleSet> {
        self.registry.active_rules()
    }

    pub fn key_set(&self) -> Arc<KeySet> {
        self.verifier.key_set()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached claim set. Decisions are unaffected apart from cost.
    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("claim cache cleared");
    }

    /// Drop the cached claims for one raw token.
    pub fn invalidate_token(&self, token: &str) {
        self.cache.invalidate(&TokenFingerprint::of(token));
    }

    pub fn rule_kinds(&self) -> Vec<&str> {
        self.catalog.kinds()
    }
}
