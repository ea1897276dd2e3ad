// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Daemon-mode entry point: writes a PID file, serves the loopback `/health`
//! endpoint, and runs the MCP stdio server until SIGINT/SIGTERM, flushing
//! persisted state on the way out (SPEC_FULL "Graceful shutdown").
//!
//! Distinct from `commands::serve`, which runs the same MCP loop in the
//! foreground without the PID-file/health-endpoint lifecycle — a host that
//! spawns `broker serve` directly already supervises the process itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use broker_core::application::Composition;
use broker_core::domain::config::Config;
use broker_core::infrastructure::logging;
use broker_core::presentation::mcp_server::McpServer;
use rmcp::service::serve_server;
use rmcp::transport::stdio;
use tokio::net::TcpListener;
use tracing::info;

use super::{remove_pid_file, write_pid_file};

struct PidFileGuard {
    assets_dir: PathBuf,
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = remove_pid_file(&self.assets_dir);
    }
}

#[derive(Clone)]
struct HealthState {
    start_time: Instant,
}

async fn health_handler(State(state): State<HealthState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptimeSeconds": state.start_time.elapsed().as_secs(),
    }))
}

pub async fn start_daemon(config_path: Option<PathBuf>, health_port: u16) -> Result<()> {
    let config = Config::load_or_default(config_path).context("failed to load configuration")?;
    let _log_handle = logging::init(config.logging.level, config.logging.file.clone())?;

    let pid = std::process::id();
    write_pid_file(&config.assets_dir, pid)?;
    let _pid_guard = PidFileGuard { assets_dir: config.assets_dir.clone() };
    info!(pid, "broker daemon starting");

    let health_state = HealthState { start_time: Instant::now() };
    let router = Router::new().route("/health", get(health_handler)).with_state(health_state);
    let listener = TcpListener::bind(("127.0.0.1", health_port)).await.with_context(|| format!("failed to bind health endpoint on 127.0.0.1:{health_port}"))?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "health endpoint failed");
        }
    });
    info!(port = health_port, "health endpoint listening on loopback");

    let composition = Arc::new(Composition::build(config).await.context("failed to build composition root")?);
    let server = McpServer::new(composition.broker.clone());

    let running_service = serve_server(server, stdio()).await.context("failed to start MCP stdio server")?;

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping daemon");
    let _ = running_service.cancel().await;
    composition.shutdown().await;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
