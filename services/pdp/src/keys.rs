//! Identity-provider key material for the PDP.
//!
//! # Purpose
//! Fetches the provider's JWKS over HTTP, converts it to a [`KeySet`], and
//! feeds it to the engine: periodically, and on demand when a token names an
//! unknown `kid`.
//!
//! # Key invariants
//! - On-demand lookups are throttled to one per `min_interval`, so a flood of
//!   tokens with made-up `kid`s cannot turn into a flood of JWKS fetches.
//! - A failed periodic refresh keeps the current keys in force.
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use warden_authz::{AuthzError, AuthzResult, DecisionEngine, Jwks, KeyResolver, KeySet};

pub const DEFAULT_MIN_LOOKUP_INTERVAL: Duration = Duration::from_secs(5);

pub struct JwksRefresher {
    url: String,
    client: reqwest::Client,
    min_interval: Duration,
    last_lookup: Mutex<Option<Instant>>,
}

impl JwksRefresher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            min_interval: DEFAULT_MIN_LOOKUP_INTERVAL,
            last_lookup: Mutex::new(None),
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<KeySet> {
        let jwks: Jwks = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("fetch jwks")?
            .error_for_status()
            .context("jwks status")?
            .json()
            .await
            .context("decode jwks")?;
        KeySet::from_jwks(&jwks).context("convert jwks")
    }

    /// Fetch and install the current keys.
    pub async fn refresh(&self, engine: &DecisionEngine) -> Result<usize> {
        let keys = self.fetch().await?;
        let count = keys.len();
        engine.rotate_keys(keys);
        Ok(count)
    }

    fn claim_lookup_slot(&self) -> bool {
        let mut last = self.last_lookup.lock();
        let now = Instant::now();
        if let Some(previous) = *last
            && now.duration_since(previous) < self.min_interval
        {
            return false;
        }
        *last = Some(now);
        true
    }
}

#[async_trait]
impl KeyResolver for JwksRefresher {
    async fn resolve(&self, kid: Option<&str>) -> AuthzResult<KeySet> {
        if !self.claim_lookup_slot() {
            tracing::debug!(kid = ?kid, "jwks lookup throttled");
            return Err(AuthzError::KeyMaterial("jwks lookup throttled".to_string()));
        }
        tracing::info!(kid = ?kid, url = %self.url, "fetching jwks for unknown kid");
        self.fetch()
            .await
            .map_err(|err| AuthzError::KeyMaterial(format!("{err:#}")))
    }
}

/// Refresh keys every `interval` until the task is aborted.
pub fn spawn_refresh_loop(
    refresher: Arc<JwksRefresher>,
    engine: Arc<DecisionEngine>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; startup already loaded keys.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match refresher.refresh(&engine).await {
                Ok(count) => {
                    metrics::counter!("warden_jwks_refresh_total", "result" => "ok").increment(1);
                    tracing::debug!(keys = count, "jwks refreshed");
                }
                Err(err) => {
                    metrics::counter!("warden_jwks_refresh_total", "result" => "error")
                        .increment(1);
                    tracing::warn!(error = %err, url = %refresher.url(), "jwks refresh failed; keeping current keys");
                }
            }
        }
    })
}
