// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! `broker serve` — runs the broker front-end (C12) over the stdio host
//! channel in the foreground. This is the mode a host process spawns
//! directly; it carries no PID file or health endpoint of its own, since the
//! host already supervises the child process it spawned.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use broker_core::application::Composition;
use broker_core::domain::config::Config;
use broker_core::infrastructure::logging;
use broker_core::presentation::mcp_server::McpServer;
use rmcp::service::serve_server;
use rmcp::transport::stdio;
use tracing::info;

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load_or_default(config_path).context("failed to load configuration")?;
    // Stdout is reserved for the MCP stdio transport; the logger never
    // writes there (spec §5 "Host-channel rule").
    let _log_handle = logging::init(config.logging.level, config.logging.file.clone())?;

    let composition = Arc::new(Composition::build(config).await.context("failed to build composition root")?);
    let server = McpServer::new(composition.broker.clone());

    info!("broker front-end starting on stdio");
    let running_service = serve_server(server, stdio()).await.context("failed to start MCP stdio server")?;

    tokio::signal::ctrl_c().await.ok();
    let _ = running_service.cancel().await;
    composition.shutdown().await;

    Ok(())
}
