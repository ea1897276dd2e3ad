// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! `broker tool list|call` — local operator commands that exercise the same
//! [`broker_core::application::broker::Broker`] dispatch path the host
//! channel uses, for inspection and scripting without an attached MCP host.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use broker_core::application::Composition;
use broker_core::domain::config::Config;

#[derive(Subcommand)]
pub enum ToolCommand {
    /// List tools in the current active set
    List,
    /// Invoke a tool by name with a JSON argument object
    Call {
        name: String,
        /// JSON-encoded argument object (default: `{}`)
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

pub async fn handle_command(command: ToolCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load_or_default(config_path).context("failed to load configuration")?;
    let composition = Composition::build(config).await.context("failed to build composition root")?;

    match command {
        ToolCommand::List => list(&composition).await,
        ToolCommand::Call { name, args } => call(&composition, &name, &args).await,
    }
}

async fn list(composition: &Composition) -> Result<()> {
    let tools = composition.broker.list_tools().await;
    println!("{}", format!("{} active tool(s)", tools.len()).bold());
    for tool in tools {
        println!("  {} — {}", tool.name.green(), tool.description);
    }
    Ok(())
}

async fn call(composition: &Composition, name: &str, args: &str) -> Result<()> {
    let arguments: serde_json::Value = serde_json::from_str(args).context("--args must be a JSON object")?;
    match composition.broker.call_tool(name, arguments).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", format!("✗ {err}").red());
            Err(err.into())
        }
    }
}
