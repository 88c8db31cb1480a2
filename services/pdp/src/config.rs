use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use warden_authz::EngineSettings;

// PDP service configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct PdpConfig {
    // Authorization API listener bind address.
    pub bind: SocketAddr,
    // Metrics/health HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // Policy bundle loaded at startup and on body-less reloads.
    pub policy_path: Option<PathBuf>,
    // Remote policy bundle, used when no path is set.
    pub policy_url: Option<String>,
    // JWKS endpoint of the identity provider.
    pub jwks_url: Option<String>,
    // Periodic JWKS refresh interval; 0 disables the refresh loop.
    pub jwks_refresh_interval_ms: u64,
    // Upper bound on an on-demand key lookup for an unknown kid.
    pub key_lookup_timeout_ms: u64,
    pub cache_enabled: bool,
    pub cache_ttl_ms: u64,
    pub cache_capacity: usize,
    pub token_issuer: Option<String>,
    pub token_audience: Option<String>,
    pub token_leeway_secs: u64,
    // Audit channel depth; 0 logs audit records inline.
    pub audit_queue: usize,
}

pub const DEFAULT_BIND: &str = "0.0.0.0:8181";
pub const DEFAULT_METRICS_BIND: &str = "0.0.0.0:9090";
const DEFAULT_JWKS_REFRESH_INTERVAL_MS: u64 = 300_000;
const DEFAULT_KEY_LOOKUP_TIMEOUT_MS: u64 = 250;
const DEFAULT_CACHE_TTL_MS: u64 = 300_000;
const DEFAULT_CACHE_CAPACITY: usize = 10_000;
const DEFAULT_TOKEN_LEEWAY_SECS: u64 = 0;
const DEFAULT_AUDIT_QUEUE: usize = 1024;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PdpConfigOverride {
    bind: Option<String>,
    metrics_bind: Option<String>,
    policy_path: Option<PathBuf>,
    policy_url: Option<String>,
    jwks_url: Option<String>,
    jwks_refresh_interval_ms: Option<u64>,
    key_lookup_timeout_ms: Option<u64>,
    cache_enabled: Option<bool>,
    cache_ttl_ms: Option<u64>,
    cache_capacity: Option<usize>,
    token_issuer: Option<String>,
    token_audience: Option<String>,
    token_leeway_secs: Option<u64>,
    audit_queue: Option<usize>,
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl PdpConfig {
    pub fn from_env() -> Result<Self> {
        let bind = std::env::var("WARDEN_BIND")
            .unwrap_or_else(|_| DEFAULT_BIND.to_string())
            .parse()
            .with_context(|| "parse WARDEN_BIND")?;
        let metrics_bind = std::env::var("WARDEN_METRICS_BIND")
            .unwrap_or_else(|_| DEFAULT_METRICS_BIND.to_string())
            .parse()
            .with_context(|| "parse WARDEN_METRICS_BIND")?;
        let key_lookup_timeout_ms = std::env::var("WARDEN_KEY_LOOKUP_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_KEY_LOOKUP_TIMEOUT_MS);
        let cache_capacity = std::env::var("WARDEN_CACHE_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_CACHE_CAPACITY);
        let audit_queue = std::env::var("WARDEN_AUDIT_QUEUE")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(DEFAULT_AUDIT_QUEUE);
        Ok(Self {
            bind,
            metrics_bind,
            policy_path: env_nonempty("WARDEN_POLICY_PATH").map(PathBuf::from),
            policy_url: env_nonempty("WARDEN_POLICY_URL"),
            jwks_url: env_nonempty("WARDEN_JWKS_URL"),
            jwks_refresh_interval_ms: env_u64(
                "WARDEN_JWKS_REFRESH_INTERVAL_MS",
                DEFAULT_JWKS_REFRESH_INTERVAL_MS,
            ),
            key_lookup_timeout_ms,
            cache_enabled: env_flag("WARDEN_CACHE_ENABLED", true),
            cache_ttl_ms: env_u64("WARDEN_CACHE_TTL_MS", DEFAULT_CACHE_TTL_MS),
            cache_capacity,
            token_issuer: env_nonempty("WARDEN_TOKEN_ISSUER"),
            token_audience: env_nonempty("WARDEN_TOKEN_AUDIENCE"),
            token_leeway_secs: env_u64("WARDEN_TOKEN_LEEWAY_SECS", DEFAULT_TOKEN_LEEWAY_SECS),
            audit_queue,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("WARDEN_CONFIG") {
            // YAML overrides allow ops-friendly config files.
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read WARDEN_CONFIG: {path}"))?;
            let override_cfg: PdpConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse pdp config yaml")?;
            config.apply(override_cfg)?;
        }
        Ok(config)
    }

    fn apply(&mut self, override_cfg: PdpConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.bind {
            self.bind = value.parse().with_context(|| "parse bind")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.policy_path {
            self.policy_path = Some(value);
        }
        if let Some(value) = override_cfg.policy_url {
            self.policy_url = Some(value);
        }
        if let Some(value) = override_cfg.jwks_url {
            self.jwks_url = Some(value);
        }
        if let Some(value) = override_cfg.jwks_refresh_interval_ms {
            self.jwks_refresh_interval_ms = value;
        }
        if let Some(value) = override_cfg.key_lookup_timeout_ms
            && value > 0
        {
            self.key_lookup_timeout_ms = value;
        }
        if let Some(value) = override_cfg.cache_enabled {
            self.cache_enabled = value;
        }
        if let Some(value) = override_cfg.cache_ttl_ms {
            self.cache_ttl_ms = value;
        }
        if let Some(value) = override_cfg.cache_capacity
            && value > 0
        {
            self.cache_capacity = value;
        }
        if let Some(value) = override_cfg.token_issuer {
            self.token_issuer = Some(value);
        }
        if let Some(value) = override_cfg.token_audience {
            self.token_audience = Some(value);
        }
        if let Some(value) = override_cfg.token_leeway_secs {
            self.token_leeway_secs = value;
        }
        if let Some(value) = override_cfg.audit_queue {
            self.audit_queue = value;
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            issuer: self.token_issuer.clone(),
            audience: self.token_audience.clone(),
            leeway: Duration::from_secs(self.token_leeway_secs),
            // A zero TTL would cache nothing; treat it as disabled.
            cache_enabled: self.cache_enabled && self.cache_ttl_ms > 0,
            cache_ttl: Duration::from_millis(self.cache_ttl_ms),
            cache_capacity: self.cache_capacity,
            key_lookup_timeout: Duration::from_millis(self.key_lookup_timeout_ms),
        }
    }
}
