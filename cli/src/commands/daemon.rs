// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! `broker daemon start|stop|status` — ambient process-supervision plumbing
//! the teacher always ships alongside a long-running service (grounded on
//! `cli/src/commands/daemon.rs`); does not change the tool surface spec.md
//! describes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use broker_core::domain::config::Config;

use crate::daemon::{check_daemon_running, stop_daemon, DaemonStatus};

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon in the background (no-op if already running)
    Start,
    /// Stop the daemon gracefully
    Stop {
        #[arg(short, long)]
        force: bool,
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },
    /// Check daemon status
    Status,
}

pub async fn handle_command(command: DaemonCommand, config_path: Option<PathBuf>, health_port: u16) -> Result<()> {
    match command {
        DaemonCommand::Start => start(config_path, health_port).await,
        DaemonCommand::Stop { force, timeout } => stop(config_path, force, timeout).await,
        DaemonCommand::Status => status(config_path, health_port).await,
    }
}

async fn start(config_path: Option<PathBuf>, health_port: u16) -> Result<()> {
    let config = Config::load_or_default(config_path.clone()).context("failed to load configuration")?;

    match check_daemon_running(&config.assets_dir, health_port).await {
        Ok(DaemonStatus::Running { pid, .. }) => {
            println!("{}", format!("✓ daemon already running (PID: {pid})").green());
            return Ok(());
        }
        Ok(DaemonStatus::Unhealthy { pid, error }) => {
            println!("{}", format!("⚠ daemon PID {pid} unhealthy ({error}), stopping it first").yellow());
            stop_daemon(&config.assets_dir, false, 10).await?;
        }
        Ok(DaemonStatus::Stopped) => {}
        Err(e) => println!("{}", format!("⚠ failed to check daemon status: {e}").yellow()),
    }

    let current_exe = std::env::current_exe().context("failed to resolve current executable path")?;
    let mut cmd = std::process::Command::new(current_exe);
    cmd.arg("--daemon").arg("--health-port").arg(health_port.to_string());
    if let Some(path) = config_path {
        cmd.arg("--config").arg(path);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let log_dir = config.assets_dir.clone();
    std::fs::create_dir_all(&log_dir)?;
    let stdout_file = std::fs::File::create(log_dir.join("daemon.out"))?;
    let stderr_file = std::fs::File::create(log_dir.join("daemon.err"))?;
    cmd.stdin(std::process::Stdio::null()).stdout(stdout_file).stderr(stderr_file);

    let child = cmd.spawn().context("failed to spawn daemon process")?;
    println!("{}", format!("✓ daemon starting (PID: {})", child.id()).green());
    println!("check status with: broker daemon status");
    Ok(())
}

async fn stop(config_path: Option<PathBuf>, force: bool, timeout: u64) -> Result<()> {
    let config = Config::load_or_default(config_path).context("failed to load configuration")?;
    stop_daemon(&config.assets_dir, force, timeout).await?;
    println!("{}", "✓ daemon stopped".green());
    Ok(())
}

async fn status(config_path: Option<PathBuf>, health_port: u16) -> Result<()> {
    let config = Config::load_or_default(config_path).context("failed to load configuration")?;
    match check_daemon_running(&config.assets_dir, health_port).await {
        Ok(DaemonStatus::Running { pid, uptime_seconds }) => {
            println!("{}", "✓ daemon is running".green());
            println!("  PID: {pid}");
            if let Some(secs) = uptime_seconds {
                println!("  uptime: {}s", secs);
            }
        }
        Ok(DaemonStatus::Stopped) => println!("{}", "✗ daemon is not running".red()),
        Ok(DaemonStatus::Unhealthy { pid, error }) => {
            println!("{}", format!("⚠ daemon unhealthy (PID: {pid})").yellow());
            println!("  {error}");
        }
        Err(e) => {
            println!("{}", format!("✗ failed to check status: {e}").red());
            return Err(e);
        }
    }
    Ok(())
}
