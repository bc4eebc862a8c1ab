// ABOUTME: Server bootstrap for SplitLab: logging, state wiring, CORS and the HTTP listener
// ABOUTME: Shared by the `serve` and `reap-orphans` commands of the splitlab binary

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use splitlab_api::{create_router, AppState};
use splitlab_sandbox::{BestEffortReport, DockerProvider, Provider, SandboxManager};
use splitlab_sessions::{ProgressBus, SessionOrchestrator, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

pub mod config;

pub use config::{Config, ConfigError};

/// Install the global subscriber; `RUST_LOG` overrides the default `info` level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// CORS layer allowing the configured frontend origin
pub fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let origin = origin
        .parse::<HeaderValue>()
        .with_context(|| format!("invalid CORS origin {}", origin))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any))
}

/// Sandbox manager backed by the local Docker daemon
pub async fn docker_sandbox(config: &Config) -> anyhow::Result<Arc<SandboxManager>> {
    let provider = DockerProvider::new().context("failed to connect to Docker")?;
    if !provider.is_available().await.unwrap_or(false) {
        anyhow::bail!("Docker daemon is not reachable");
    }
    Ok(Arc::new(SandboxManager::new(
        Arc::new(provider),
        config.sandbox.clone(),
    )))
}

/// Wire registry, progress bus and orchestrator around a sandbox manager
pub fn build_orchestrator(config: &Config, sandbox: Arc<SandboxManager>) -> Arc<SessionOrchestrator> {
    Arc::new(SessionOrchestrator::new(
        Arc::new(SessionRegistry::new()),
        sandbox,
        Arc::new(ProgressBus::new()),
        config.sessions.clone(),
    ))
}

/// Remove every session container left behind by a previous run
pub async fn reap_orphans(sandbox: &SandboxManager) -> anyhow::Result<BestEffortReport> {
    let report = sandbox
        .reap_orphans()
        .await
        .context("failed to list session containers")?;
    info!(
        "Reaped {} orphaned sandboxes ({} problems)",
        report.completed_steps().count(),
        report.failures().count()
    );
    Ok(report)
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let sandbox = docker_sandbox(&config).await?;

    // Nothing in a fresh registry owns existing session containers
    if let Err(e) = reap_orphans(&sandbox).await {
        warn!("Startup orphan sweep failed: {:#}", e);
    }

    let orchestrator = build_orchestrator(&config, sandbox);
    let reclamation = orchestrator.clone().start_reclamation_task();

    let app = create_router(AppState::new(orchestrator)).layer(cors_layer(&config.cors_origin)?);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("SplitLab API listening on http://{}", addr);
    info!("CORS origin: {}", config.cors_origin);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    reclamation.abort();
    info!("SplitLab API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_rejects_unparseable_origin() {
        assert!(cors_layer("http://localhost:5173").is_ok());
        assert!(cors_layer("http://local\nhost").is_err());
    }
}
