//! Rule contract and the built-in rule catalog.
//!
//! # Purpose
//! A rule is a named predicate over `(request, claims)` whose only effect is
//! Allow. Rules are OR-combined by the evaluator; no rule can deny.
//!
//! # Key invariants
//! - `matches` must be side-effect free. It may return an error, which the
//!   evaluator logs and treats as a non-match.
//! - Self-access and admin-override require the exact `prefix + [id]` path
//!   shape. Requests with trailing segments never match either rule.
//!
//! # Examples
//! ```rust
//! use warden_authz::{AuthorizationRequest, Method, Rule, SelfAccessRule};
//!
//! let rule = SelfAccessRule::new("self-access");
//! let request = AuthorizationRequest::new(Method::Get, "api").with_path("/api/v1/users/u1");
//! assert_eq!(rule.name(), "self-access");
//! assert_eq!(request.path_segments().len(), 4);
//! ```
use crate::errors::{AuthzError, AuthzResult};
use crate::matcher::WorkloadPatterns;
use crate::request::{AuthorizationRequest, Method};
use crate::token::ClaimSet;
use serde::Deserialize;

pub const TENANT_ISOLATION: &str = "tenant_isolation";
pub const SELF_ACCESS: &str = "self_access";
pub const ADMIN_OVERRIDE: &str = "admin_override";

pub const DEFAULT_TENANT_LABEL: &str = "tenant";
pub const DEFAULT_ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
}

pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn effect(&self) -> Effect {
        Effect::Allow
    }

    fn matches(&self, request: &AuthorizationRequest, claims: &ClaimSet) -> AuthzResult<bool>;
}

type Predicate = dyn Fn(&AuthorizationRequest, &ClaimSet) -> AuthzResult<bool> + Send + Sync;

/// Rule backed by a closure, for custom rules that need no state of their own.
pub struct FnRule {
    name: String,
    predicate: Box<Predicate>,
}

impl FnRule {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&AuthorizationRequest, &ClaimSet) -> AuthzResult<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
        }
    }
}

impl Rule for FnRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, request: &AuthorizationRequest, claims: &ClaimSet) -> AuthzResult<bool> {
        (self.predicate)(request, claims)
    }
}

fn default_destinations() -> WorkloadPatterns {
    WorkloadPatterns::any()
}

fn default_tenant_label() -> String {
    DEFAULT_TENANT_LABEL.to_string()
}

fn default_users_prefix() -> Vec<String> {
    vec!["api".to_string(), "v1".to_string(), "users".to_string()]
}

fn default_admin_role() -> String {
    DEFAULT_ADMIN_ROLE.to_string()
}

/// Service-to-service calls inside one tenant.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantIsolationRule {
    #[serde(skip)]
    name: String,
    sources: WorkloadPatterns,
    #[serde(default = "default_destinations")]
    destinations: WorkloadPatterns,
    #[serde(default = "default_tenant_label")]
    tenant_label: String,
}

impl TenantIsolationRule {
    pub fn new(
        name: impl Into<String>,
        sources: WorkloadPatterns,
        destinations: WorkloadPatterns,
    ) -> AuthzResult<Self> {
        Self {
            name: name.into(),
            sources,
            destinations,
            tenant_label: default_tenant_label(),
        }
        .validated()
    }

    pub fn with_tenant_label(mut self, label: impl Into<String>) -> Self {
        self.tenant_label = label.into();
        self
    }

    pub(crate) fn from_params(name: &str, params: &serde_json::Value) -> AuthzResult<Self> {
        let mut rule: Self = serde_json::from_value(params.clone())
            .map_err(|err| AuthzError::policy_load(format!("rule {name}: {err}")))?;
        rule.name = name.to_string();
        rule.validated()
    }

    fn validated(self) -> AuthzResult<Self> {
        if self.sources.is_empty() {
            return Err(AuthzError::policy_load(format!(
                "rule {}: sources must not be empty",
                self.name
            )));
        }
        if self.tenant_label.is_empty() {
            return Err(AuthzError::policy_load(format!(
                "rule {}: tenant_label must not be empty",
                self.name
            )));
        }
        Ok(self)
    }
}

impl Rule for TenantIsolationRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, request: &AuthorizationRequest, claims: &ClaimSet) -> AuthzResult<bool> {
        // End-user calls carry no source workload and are out of this rule's reach.
        if request.source_workload().is_empty() {
            return Ok(false);
        }
        if !self.sources.matches(request.source_workload())
            || !self.destinations.matches(request.destination_workload())
        {
            return Ok(false);
        }
        Ok(match (claims.tenant(), request.label(&self.tenant_label)) {
            (Some(token_tenant), Some(destination_tenant)) => token_tenant == destination_tenant,
            _ => false,
        })
    }
}

/// Returns the trailing id when `segments` is exactly `prefix + [id]`.
fn id_after_prefix<'a>(segments: &'a [String], prefix: &[String]) -> Option<&'a str> {
    if segments.len() != prefix.len() + 1 {
        return None;
    }
    let (head, id) = segments.split_at(prefix.len());
    (head == prefix).then(|| id[0].as_str())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelfAccessRule {
    #[serde(skip)]
    name: String,
    #[serde(default = "default_users_prefix")]
    path_prefix: Vec<String>,
}

impl SelfAccessRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_prefix: default_users_prefix(),
        }
    }

    pub fn with_path_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path_prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn from_params(name: &str, params: &serde_json::Value) -> AuthzResult<Self> {
        let mut rule: Self = serde_json::from_value(params.clone())
            .map_err(|err| AuthzError::policy_load(format!("rule {name}: {err}")))?;
        rule.name = name.to_string();
        Ok(rule)
    }
}

impl Rule for SelfAccessRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, request: &AuthorizationRequest, claims: &ClaimSet) -> AuthzResult<bool> {
        if request.method() != Method::Get {
            return Ok(false);
        }
        Ok(id_after_prefix(request.path_segments(), &self.path_prefix)
            .is_some_and(|user_id| user_id == claims.subject()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminOverrideRule {
    #[serde(skip)]
    name: String,
    #[serde(default = "default_users_prefix")]
    path_prefix: Vec<String>,
    #[serde(default = "default_admin_role")]
    role: String,
}

impl AdminOverrideRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_prefix: default_users_prefix(),
            role: default_admin_role(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_path_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path_prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn from_params(name: &str, params: &serde_json::Value) -> AuthzResult<Self> {
        let mut rule: Self = serde_json::from_value(params.clone())
            .map_err(|err| AuthzError::policy_load(format!("rule {name}: {err}")))?;
        rule.name = name.to_string();
        Ok(rule)
    }
}

impl Rule for AdminOverrideRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, request: &AuthorizationRequest, claims: &ClaimSet) -> AuthzResult<bool> {
        if request.method() != Method::Get || claims.role() != self.role {
            return Ok(false);
        }
        Ok(id_after_prefix(request.path_segments(), &self.path_prefix).is_some())
    }
}
