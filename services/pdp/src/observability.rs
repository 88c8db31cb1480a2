//! Observability setup for the PDP service: tracing and metrics.
//!
//! Installs a tracing subscriber (env filter plus a text or JSON fmt layer,
//! chosen by `WARDEN_LOG_FORMAT`) and a Prometheus metrics recorder, and serves
//! `/metrics`, `/live` and `/ready` on a dedicated listener.
//!
//! `/ready` reports ready only once a policy bundle has been loaded. Until
//! then every decision would be a default deny.
//!
//! In tests the recorder is installed once and cached, and subscriber
//! initialization tolerates an already-installed global subscriber.

use anyhow::{Context, Result};
use axum::http::StatusCode;
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
#[cfg(test)]
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use warden_authz::DecisionEngine;

#[cfg(test)]
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("WARDEN_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Initializes tracing and installs the Prometheus recorder.
///
/// Returns the handle used to render `/metrics`.
pub fn init_observability(service_name: &str) -> Result<PrometheusHandle> {
    // Default to "info" when RUST_LOG is unset or invalid.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match LogFormat::from_env() {
        LogFormat::Json => init_subscriber(registry.with(tracing_subscriber::fmt::layer().json())),
        LogFormat::Text => init_subscriber(registry.with(tracing_subscriber::fmt::layer())),
    }
    tracing::debug!(service = service_name, "observability initialized");

    install_metrics_recorder()
}

/// Router for the metrics and health listener.
pub fn metrics_router(handle: PrometheusHandle, engine: Arc<DecisionEngine>) -> axum::Router {
    axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/live", axum::routing::get(|| async { "ok" }))
        .route(
            "/ready",
            axum::routing::get(move || async move {
                if engine.active_rules().generation() > 0 {
                    (StatusCode::OK, "ok")
                } else {
                    (StatusCode::SERVICE_UNAVAILABLE, "policy not loaded")
                }
            }),
        )
}

/// Serves metrics and health endpoints on `addr` until the task is aborted.
pub async fn serve_metrics(
    handle: PrometheusHandle,
    engine: Arc<DecisionEngine>,
    addr: SocketAddr,
) -> std::io::Result<()> {
    let app = metrics_router(handle, engine);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await
}

/// Runs [`serve_metrics`] in the background. A bind or serve failure is
/// logged and ends the task; the decision API keeps running without it.
pub fn spawn_metrics_listener(
    handle: PrometheusHandle,
    engine: Arc<DecisionEngine>,
    addr: SocketAddr,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match serve_metrics(handle, engine, addr).await {
            Ok(()) => tracing::info!(%addr, "metrics listener stopped"),
            Err(err) => tracing::warn!(%addr, error = %err, "metrics listener exited"),
        }
    })
}

fn install_metrics_recorder() -> Result<PrometheusHandle> {
    #[cfg(test)]
    {
        if let Some(handle) = METRICS_HANDLE.get() {
            return Ok(handle.clone());
        }
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("install metrics recorder")?;
        let _ = METRICS_HANDLE.set(handle.clone());
        Ok(handle)
    }
    #[cfg(not(test))]
    {
        PrometheusBuilder::new()
            .install_recorder()
            .context("install metrics recorder")
    }
}

/// In tests, uses `try_init` so repeated initialization is harmless.
fn init_subscriber<S>(subscriber: S)
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    #[cfg(test)]
    {
        let _ = subscriber.try_init();
    }
    #[cfg(not(test))]
    {
        subscriber.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serial_test::serial;
    use tower::ServiceExt;
    use warden_authz::{KeySet, PolicySource};

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    async fn status_of(app: axum::Router, uri: &str) -> StatusCode {
        app.oneshot(Request::get(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response")
            .status()
    }

    #[test]
    #[serial]
    fn log_format_reads_env() {
        let _guard = EnvGuard::set("WARDEN_LOG_FORMAT", "JSON");
        assert_eq!(LogFormat::from_env(), LogFormat::Json);
        let _guard = EnvGuard::set("WARDEN_LOG_FORMAT", "pretty");
        assert_eq!(LogFormat::from_env(), LogFormat::Text);
        let _guard = EnvGuard::unset("WARDEN_LOG_FORMAT");
        assert_eq!(LogFormat::from_env(), LogFormat::Text);
    }

    #[tokio::test]
    #[serial]
    async fn readiness_waits_for_policy() {
        let handle = init_observability("warden-pdp-test").expect("observability");
        let engine = Arc::new(DecisionEngine::builder(KeySet::empty()).build());
        let app = metrics_router(handle, Arc::clone(&engine));

        assert_eq!(status_of(app.clone(), "/live").await, StatusCode::OK);
        assert_eq!(
            status_of(app.clone(), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        engine
            .reload(PolicySource::Yaml("version: v1\nrules: []\n".to_string()))
            .expect("reload");
        assert_eq!(status_of(app.clone(), "/ready").await, StatusCode::OK);
        assert_eq!(status_of(app, "/metrics").await, StatusCode::OK);
    }

    #[tokio::test]
    #[serial]
    async fn metrics_listener_reports_bind_failure() {
        let handle = init_observability("warden-pdp-test").expect("observability");
        let engine = Arc::new(DecisionEngine::builder(KeySet::empty()).build());
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = occupied.local_addr().expect("addr");

        let err = serve_metrics(handle.clone(), Arc::clone(&engine), addr)
            .await
            .expect_err("port in use");
        assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);

        // The background listener ends on its own instead of hanging or panicking.
        let task = spawn_metrics_listener(handle, engine, addr);
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("listener task finished")
            .expect("join");
    }
}
