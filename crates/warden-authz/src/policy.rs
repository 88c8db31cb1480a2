//! Policy bundles and the rule catalog.
//!
//! # Purpose
//! Parses versioned YAML/JSON policy bundles and compiles them into rule
//! objects through a [`RuleCatalog`] keyed by rule `kind`.
//!
//! # Key invariants
//! - A bundle compiles completely or not at all. Any bad rule rejects the
//!   whole bundle and leaves the active set untouched.
//! - Rule order in the bundle is evaluation order.
//!
//! # Examples
//! ```rust
//! use warden_authz::{PolicyDocument, RuleCatalog};
//!
//! let doc = PolicyDocument::from_yaml(
//!     "version: v1\nrules:\n  - name: self\n    kind: self_access\n",
//! )
//! .unwrap();
//! let (version, rules) = RuleCatalog::with_builtins().compile(&doc).unwrap();
//! assert_eq!(version, "v1");
//! assert_eq!(rules.len(), 1);
//! ```
use crate::errors::{AuthzError, AuthzResult};
use crate::rule::{
    ADMIN_OVERRIDE, AdminOverrideRule, Rule, SELF_ACCESS, SelfAccessRule, TENANT_ISOLATION,
    TenantIsolationRule,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Builds a rule from its name and kind-specific fields.
pub type RuleFactory =
    Arc<dyn Fn(&str, &serde_json::Value) -> AuthzResult<Arc<dyn Rule>> + Send + Sync>;

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDocument {
    pub name: String,
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Every other field of the rule entry.
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub version: String,
    #[serde(default)]
    pub rules: Vec<RuleDocument>,
}

impl PolicyDocument {
    pub fn from_yaml(text: &str) -> AuthzResult<Self> {
        // Through a JSON value so YAML and JSON bundles share one decoding path.
        let value: serde_json::Value = serde_yaml::from_str(text)
            .map_err(|err| AuthzError::policy_load(format!("yaml: {err}")))?;
        serde_json::from_value(value)
            .map_err(|err| AuthzError::policy_load(format!("bundle: {err}")))
    }

    pub fn from_json(text: &str) -> AuthzResult<Self> {
        serde_json::from_str(text).map_err(|err| AuthzError::policy_load(format!("json: {err}")))
    }

    /// `.json` files are JSON; everything else is read as YAML.
    pub fn from_file(path: &Path) -> AuthzResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            AuthzError::policy_load(format!("read {}: {err}", path.display()))
        })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&text)
        } else {
            Self::from_yaml(&text)
        }
    }
}

/// Where a reload takes its rules from.
pub enum PolicySource {
    File(PathBuf),
    Yaml(String),
    Json(String),
    /// Pre-built rules, bypassing the catalog.
    Rules {
        version: String,
        rules: Vec<Arc<dyn Rule>>,
    },
}

impl std::fmt::Debug for PolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicySource::File(path) => f.debug_tuple("File").field(path).finish(),
            PolicySource::Yaml(text) => f.debug_tuple("Yaml").field(&text.len()).finish(),
            PolicySource::Json(text) => f.debug_tuple("Json").field(&text.len()).finish(),
            PolicySource::Rules { version, rules } => f
                .debug_struct("Rules")
                .field("version", version)
                .field("rules", &rules.len())
                .finish(),
        }
    }
}

#[derive(Clone)]
pub struct RuleCatalog {
    factories: HashMap<String, RuleFactory>,
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl RuleCatalog {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut catalog = Self::empty();
        catalog.register(
            TENANT_ISOLATION,
            Arc::new(|name: &str, params: &serde_json::Value| -> AuthzResult<Arc<dyn Rule>> {
                Ok(Arc::new(TenantIsolationRule::from_params(name, params)?) as Arc<dyn Rule>)
            }),
        );
        catalog.register(
            SELF_ACCESS,
            Arc::new(|name: &str, params: &serde_json::Value| -> AuthzResult<Arc<dyn Rule>> {
                Ok(Arc::new(SelfAccessRule::from_params(name, params)?) as Arc<dyn Rule>)
            }),
        );
        catalog.register(
            ADMIN_OVERRIDE,
            Arc::new(|name: &str, params: &serde_json::Value| -> AuthzResult<Arc<dyn Rule>> {
                Ok(Arc::new(AdminOverrideRule::from_params(name, params)?) as Arc<dyn Rule>)
            }),
        );
        catalog
    }

    /// Register or replace the factory for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, factory: RuleFactory) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build the enabled rules of `doc`, in document order.
    pub fn compile(&self, doc: &PolicyDocument) -> AuthzResult<(String, Vec<Arc<dyn Rule>>)> {
        let version = doc.version.trim();
        if version.is_empty() {
            return Err(AuthzError::policy_load("bundle version must not be empty"));
        }

        let mut names = HashSet::new();
        let mut rules = Vec::with_capacity(doc.rules.len());
        for entry in &doc.rules {
            if entry.name.trim().is_empty() {
                return Err(AuthzError::policy_load("rule name must not be empty"));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(AuthzError::policy_load(format!(
                    "duplicate rule name {}",
                    entry.name
                )));
            }
            let factory = self.factories.get(&entry.kind).ok_or_else(|| {
                AuthzError::policy_load(format!(
                    "rule {}: unknown kind {}",
                    entry.name, entry.kind
                ))
            })?;
            if !entry.enabled {
                continue;
            }
            let params = serde_json::Value::Object(entry.params.clone());
            let rule = factory(&entry.name, &params).map_err(|err| match err {
                load @ AuthzError::PolicyLoad(_) => load,
                other => AuthzError::policy_load(format!("rule {}: {other}", entry.name)),
            })?;
            rules.push(rule);
        }
        Ok((version.to_string(), rules))
    }

    /// Resolve any source into a version and rule list.
    pub fn resolve(&self, source: PolicySource) -> AuthzResult<(String, Vec<Arc<dyn Rule>>)> {
        let doc = match source {
            PolicySource::File(path) => PolicyDocument::from_file(&path)?,
            PolicySource::Yaml(text) => PolicyDocument::from_yaml(&text)?,
            PolicySource::Json(text) => PolicyDocument::from_json(&text)?,
            PolicySource::Rules { version, rules } => {
                return validate_prebuilt(version, rules);
            }
        };
        self.compile(&doc)
    }
}

fn validate_prebuilt(
    version: String,
    rules: Vec<Arc<dyn Rule>>,
) -> AuthzResult<(String, Vec<Arc<dyn Rule>>)> {
    if version.trim().is_empty() {
        return Err(AuthzError::policy_load("bundle version must not be empty"));
    }
    let mut names = HashSet::new();
    for rule in &rules {
        if !names.insert(rule.name()) {
            return Err(AuthzError::policy_load(format!(
                "duplicate rule name {}",
                rule.name()
            )));
        }
    }
    Ok((version, rules))
}
