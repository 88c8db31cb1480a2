//! Warden PDP service entry point.
//!
//! # Purpose
//! Wires configuration, key material, the decision engine and the HTTP
//! routers, then serves the authorization API until shutdown.
//!
//! # Notes
//! A configured policy that fails to load aborts startup. An unreachable JWKS
//! endpoint does not: the engine starts with no keys and fetches on demand.
mod observability;

use anyhow::{Context, Result};
use pdp::app::{AppState, build_router};
use pdp::bundle::PolicyLocation;
use pdp::config::PdpConfig;
use pdp::keys::{JwksRefresher, spawn_refresh_loop};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use warden_authz::{
    AuditSink, ChannelAuditSink, DecisionEngine, KeySet, TracingAuditSink,
};

#[tokio::main]
async fn main() -> Result<()> {
    run_with_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("warden-pdp")?;
    let config = PdpConfig::from_env_or_yaml()?;

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let refresher = config.jwks_url.clone().map(|url| Arc::new(JwksRefresher::new(url)));
    let keys = initial_keys(refresher.as_deref()).await;
    let (audit, audit_task) = build_audit_sink(config.audit_queue);
    tasks.extend(audit_task);

    let mut builder = DecisionEngine::builder(keys)
        .settings(config.engine_settings())
        .audit_sink(audit);
    if let Some(refresher) = &refresher {
        builder = builder.key_resolver(refresher.clone());
    }
    let engine = Arc::new(builder.build());

    let policy = PolicyLocation::new(config.policy_path.clone(), config.policy_url.clone());
    let state = AppState::new(Arc::clone(&engine), policy);
    if let Some(source) = state.policy.fetch(&state.http).await? {
        engine.reload(source).context("load initial policy")?;
    } else {
        tracing::warn!("no policy configured; denying everything until one is loaded");
    }

    match &refresher {
        Some(refresher) if config.jwks_refresh_interval_ms > 0 => {
            tasks.push(spawn_refresh_loop(
                Arc::clone(refresher),
                Arc::clone(&engine),
                Duration::from_millis(config.jwks_refresh_interval_ms),
            ));
        }
        Some(_) => tracing::info!("periodic jwks refresh disabled"),
        None => tracing::info!("jwks refresh disabled (WARDEN_JWKS_URL not set)"),
    }

    tasks.push(observability::spawn_metrics_listener(
        metrics_handle,
        Arc::clone(&engine),
        config.metrics_bind,
    ));

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "pdp listening");
    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result?;
        }
        _ = &mut shutdown => {}
    }

    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("pdp stopped");
    Ok(())
}

async fn initial_keys(refresher: Option<&JwksRefresher>) -> KeySet {
    let Some(refresher) = refresher else {
        return KeySet::empty();
    };
    match refresher.fetch().await {
        Ok(keys) => {
            tracing::info!(keys = keys.len(), url = %refresher.url(), "initial jwks loaded");
            keys
        }
        Err(err) => {
            tracing::warn!(error = %err, url = %refresher.url(), "initial jwks fetch failed; starting without keys");
            KeySet::empty()
        }
    }
}

/// Queue depth 0 logs audit records inline; otherwise a bounded channel is
/// drained into the log by a background task.
fn build_audit_sink(queue: usize) -> (Arc<dyn AuditSink>, Option<JoinHandle<()>>) {
    if queue == 0 {
        return (Arc::new(TracingAuditSink), None);
    }
    let (sink, mut rx) = ChannelAuditSink::new(queue);
    let task = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            TracingAuditSink.record(record);
        }
    });
    (Arc::new(sink), Some(task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode};
    use serial_test::serial;
    use std::io::Write;
    use tokio::net::TcpListener;

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

    fn base_env() -> Vec<EnvGuard> {
        vec![
            EnvGuard::set("WARDEN_BIND", "127.0.0.1:0"),
            EnvGuard::set("WARDEN_METRICS_BIND", "127.0.0.1:0"),
            EnvGuard::unset("WARDEN_CONFIG"),
            EnvGuard::unset("WARDEN_POLICY_PATH"),
            EnvGuard::unset("WARDEN_POLICY_URL"),
            EnvGuard::unset("WARDEN_JWKS_URL"),
        ]
    }

    async fn start_error_server() -> Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = Router::new().fallback(|| async { StatusCode::INTERNAL_SERVER_ERROR });
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });
        Ok(format!("http://{}", addr))
    }

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_without_policy_or_jwks() -> Result<()> {
        let _env = base_env();
        run_with_shutdown(async {}).await?;
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_with_policy_file_and_failing_jwks() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            "version: v1\nrules:\n  - name: self-access\n    kind: self_access"
        )?;
        let _env = base_env();
        let _policy = EnvGuard::set(
            "WARDEN_POLICY_PATH",
            file.path().to_str().expect("utf-8 path"),
        );
        let base_url = start_error_server().await?;
        let _jwks = EnvGuard::set("WARDEN_JWKS_URL", &format!("{base_url}/jwks"));
        let _queue = EnvGuard::set("WARDEN_AUDIT_QUEUE", "0");
        run_with_shutdown(async {}).await?;
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn invalid_initial_policy_aborts_startup() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "version: v1\nrules:\n  - name: x\n    kind: no_such_kind")?;
        let _env = base_env();
        let _policy = EnvGuard::set(
            "WARDEN_POLICY_PATH",
            file.path().to_str().expect("utf-8 path"),
        );
        let err = run_with_shutdown(async {}).await.expect_err("bad policy");
        assert!(err.to_string().contains("load initial policy"));
        Ok(())
    }

    #[tokio::test]
    async fn audit_queue_drains_into_log() {
        let (sink, task) = build_audit_sink(4);
        let task = task.expect("drain task");
        drop(sink);
        // With the only sender gone the drain loop ends on its own.
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("drain finished")
            .expect("join");

        let (_sink, task) = build_audit_sink(0);
        assert!(task.is_none());
    }
}
