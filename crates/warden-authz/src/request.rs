//! Authorization request snapshot.
//!
//! # Purpose
//! Describes one inbound call (who calls, what is called, which method and
//! path) in a transport-neutral form the rule evaluator can match against.
//!
//! # Key invariants
//! - A request is immutable once built; rules only ever see `&AuthorizationRequest`.
//! - Path segments never contain `/` and never include empty segments. This
//!   holds for deserialized requests too: a supplied segment holding `/` is
//!   split at it, and empty pieces are dropped.
//!
//! # Examples
//! ```rust
//! use warden_authz::{AuthorizationRequest, Method};
//!
//! let request = AuthorizationRequest::new(Method::Get, "api")
//!     .with_source("frontend")
//!     .with_path("/api/v1/users/u1")
//!     .with_label("tenant", "acme");
//! assert_eq!(request.path_segments(), ["api", "v1", "users", "u1"]);
//! ```
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(()),
        }
    }
}

/// Read-only description of the call being authorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    #[serde(default)]
    source_workload: String,
    destination_workload: String,
    method: Method,
    #[serde(default, deserialize_with = "deserialize_segments")]
    path_segments: Vec<String>,
    #[serde(default)]
    destination_labels: BTreeMap<String, String>,
}

impl AuthorizationRequest {
    pub fn new(method: Method, destination_workload: impl Into<String>) -> Self {
        Self {
            source_workload: String::new(),
            destination_workload: destination_workload.into(),
            method,
            path_segments: Vec::new(),
            destination_labels: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source_workload: impl Into<String>) -> Self {
        self.source_workload = source_workload.into();
        self
    }

    /// Split a URL path into segments, dropping empty ones and any query string.
    pub fn with_path(mut self, path: &str) -> Self {
        self.path_segments = split_path(path);
        self
    }

    pub fn with_segments<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path_segments = normalize_segments(segments.into_iter().map(Into::into));
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.destination_labels.insert(key.into(), value.into());
        self
    }

    /// Empty for end-user calls that do not originate from a workload.
    pub fn source_workload(&self) -> &str {
        &self.source_workload
    }

    pub fn destination_workload(&self) -> &str {
        &self.destination_workload
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path_segments(&self) -> &[String] {
        &self.path_segments
    }

    pub fn destination_labels(&self) -> &BTreeMap<String, String> {
        &self.destination_labels
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.destination_labels.get(key).map(String::as_str)
    }
}

pub fn split_path(path: &str) -> Vec<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_segments(segments: impl Iterator<Item = String>) -> Vec<String> {
    segments
        .flat_map(|segment| {
            segment
                .split('/')
                .filter(|piece| !piece.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn deserialize_segments<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let segments = Vec::<String>::deserialize(deserializer)?;
    Ok(normalize_segments(segments.into_iter()))
}
