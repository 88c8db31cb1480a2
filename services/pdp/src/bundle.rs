//! Where the PDP gets its policy bundle from.
//!
//! A configured file path wins over a configured URL. Inline bundles posted to
//! the reload endpoint bypass both.
use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use std::path::PathBuf;
use warden_authz::PolicySource;

#[derive(Debug, Clone, Default)]
pub struct PolicyLocation {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
}

impl PolicyLocation {
    pub fn new(path: Option<PathBuf>, url: Option<String>) -> Self {
        Self { path, url }
    }

    pub fn is_configured(&self) -> bool {
        self.path.is_some() || self.url.is_some()
    }

    /// Resolve the configured location into a source the engine can load.
    /// Returns `None` when nothing is configured.
    pub async fn fetch(&self, client: &reqwest::Client) -> Result<Option<PolicySource>> {
        if let Some(path) = &self.path {
            return Ok(Some(PolicySource::File(path.clone())));
        }
        let Some(url) = &self.url else {
            return Ok(None);
        };
        let response = client
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetch policy bundle {url}"))?
            .error_for_status()
            .with_context(|| format!("policy bundle status {url}"))?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.context("read policy bundle body")?;
        Ok(Some(source_for_body(content_type.as_deref(), text)))
    }
}

/// JSON when the content type says so, or when an untyped body looks like a
/// JSON object; YAML otherwise.
pub fn source_for_body(content_type: Option<&str>, body: String) -> PolicySource {
    let is_json = match content_type {
        Some(value) => value.to_ascii_lowercase().contains("json"),
        None => body.trim_start().starts_with('{'),
    };
    if is_json {
        PolicySource::Json(body)
    } else {
        PolicySource::Yaml(body)
    }
}
