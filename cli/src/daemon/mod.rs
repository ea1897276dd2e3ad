// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Daemon lifecycle for the broker process itself (SPEC_FULL "Supplemented
//! features"), distinct from the studio lifecycle (C8) which manages
//! *renderer* child processes. Grounded on the teacher's
//! `cli/src/daemon/{mod,server,client}.rs`: a PID file, a loopback-only HTTP
//! `/health` endpoint, and `broker daemon start|stop|status` subcommands.

pub mod client;
pub mod server;

pub use client::{check_daemon_running, DaemonStatus};
pub use server::start_daemon;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{info, warn};

/// Default loopback port for the daemon's `/health` endpoint (never the
/// host channel — that is stdio only, per spec §5 "Host-channel rule").
pub const DEFAULT_HEALTH_PORT: u16 = 7703;

pub fn pid_file_path(assets_dir: &std::path::Path) -> PathBuf {
    assets_dir.join(".broker.pid")
}

pub fn write_pid_file(assets_dir: &std::path::Path, pid: u32) -> Result<()> {
    let path = pid_file_path(assets_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, pid.to_string()).with_context(|| format!("failed to write PID file: {path:?}"))?;
    info!(path = ?path, "wrote PID file");
    Ok(())
}

pub fn remove_pid_file(assets_dir: &std::path::Path) -> Result<()> {
    let path = pid_file_path(assets_dir);
    if path.exists() {
        std::fs::remove_file(&path).with_context(|| format!("failed to remove PID file: {path:?}"))?;
        info!(path = ?path, "removed PID file");
    }
    Ok(())
}

pub fn read_pid_file(assets_dir: &std::path::Path) -> Option<u32> {
    std::fs::read_to_string(pid_file_path(assets_dir)).ok()?.trim().parse().ok()
}

#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn process_exists(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) -> Result<()> {
    unsafe {
        if libc::kill(pid as i32, signal) != 0 {
            anyhow::bail!("failed to send signal {signal} to process {pid}");
        }
    }
    Ok(())
}

/// Sends SIGTERM, polls for exit, escalates to SIGKILL past `timeout_secs`
/// when `force` is set (mirrors the teacher's `daemon::stop_daemon`).
pub async fn stop_daemon(assets_dir: &std::path::Path, force: bool, timeout_secs: u64) -> Result<()> {
    let pid = read_pid_file(assets_dir).context("no PID file found; is the daemon running?")?;

    info!(pid, "sending SIGTERM");
    #[cfg(unix)]
    {
        send_signal(pid, libc::SIGTERM)?;
        for _ in 0..timeout_secs {
            if !process_exists(pid) {
                info!("daemon stopped gracefully");
                let _ = remove_pid_file(assets_dir);
                return Ok(());
            }
            sleep(Duration::from_secs(1)).await;
        }
        if force {
            warn!("graceful shutdown timed out, sending SIGKILL");
            send_signal(pid, libc::SIGKILL)?;
            sleep(Duration::from_secs(1)).await;
        } else {
            anyhow::bail!("daemon did not stop within {timeout_secs}s");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (force, timeout_secs);
        anyhow::bail!("daemon stop is only implemented on unix");
    }

    let _ = remove_pid_file(assets_dir);
    Ok(())
}
