// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! `broker` — the CLI and daemon front-end for the Montage Broker, grounded
//! on the teacher's `cli/src/main.rs` global-flags-plus-subcommands shape.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use montage_broker_cli::commands::{self, ConfigCommand, DaemonCommand, ToolCommand};
use montage_broker_cli::daemon::server::start_daemon;

const DEFAULT_HEALTH_PORT: u16 = 7703;

#[derive(Parser)]
#[command(name = "broker", version, about = "Montage Broker — tool-broker daemon for motion-graphics rendering hosts")]
struct Cli {
    /// Run as a background daemon (set automatically by `broker daemon start`)
    #[arg(long, global = true, hide = true)]
    daemon: bool,

    /// Path to the configuration file (overrides MONTAGE_CONFIG_PATH discovery)
    #[arg(short, long, global = true, env = "MONTAGE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Port the loopback health endpoint listens on in daemon mode
    #[arg(long, global = true, env = "MONTAGE_BROKER_HEALTH_PORT", default_value_t = DEFAULT_HEALTH_PORT)]
    health_port: u16,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker front-end on stdio in the foreground
    Serve,
    /// Manage the background daemon process
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
    /// Inspect or invoke tools directly, without an attached host
    Tool {
        #[command(subcommand)]
        command: ToolCommand,
    },
    /// View, validate, or generate configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.daemon {
        return start_daemon(cli.config, cli.health_port).await;
    }

    match cli.command {
        Some(Commands::Serve) => commands::serve::run(cli.config).await,
        Some(Commands::Daemon { command }) => commands::daemon::handle_command(command, cli.config, cli.health_port).await,
        Some(Commands::Tool { command }) => commands::tool::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("no command specified; run `broker --help` for usage");
            std::process::exit(1);
        }
    }
}
