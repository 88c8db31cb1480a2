//! Request and response bodies for the PDP HTTP API.
use serde::{Deserialize, Serialize};
use warden_authz::{AuthorizationRequest, CacheStats, RuleSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// Body of `POST /v1/authorize`. The token may instead arrive as a bearer
/// credential in the `Authorization` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    #[serde(default)]
    pub token: Option<String>,
    pub request: AuthorizationRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicySummary {
    pub version: String,
    pub generation: u64,
    pub rules: Vec<String>,
}

impl From<&RuleSet> for PolicySummary {
    fn from(active: &RuleSet) -> Self {
        Self {
            version: active.version().to_string(),
            generation: active.generation(),
            rules: active.rule_names(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeysSummary {
    pub kids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub hit_rate: f64,
}

impl From<CacheStats> for CacheSummary {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            stats,
        }
    }
}
