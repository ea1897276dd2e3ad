// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Daemon health-check client: probes the loopback `/health` endpoint and
//! cross-references the PID file, mirroring the teacher's
//! `daemon::check_daemon_running`.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use super::{process_exists, read_pid_file, remove_pid_file};

#[derive(Debug, Clone)]
pub enum DaemonStatus {
    Running { pid: u32, uptime_seconds: Option<u64> },
    Stopped,
    Unhealthy { pid: u32, error: String },
}

/// HTTP health check first (works even if the PID file is stale on a
/// container restart), falling back to PID-file + signal-0 liveness.
pub async fn check_daemon_running(assets_dir: &Path, health_port: u16) -> Result<DaemonStatus> {
    let client = reqwest::Client::builder().timeout(Duration::from_millis(500)).build()?;
    let url = format!("http://127.0.0.1:{health_port}/health");
    let local_pid = read_pid_file(assets_dir);

    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let uptime_seconds = resp.json::<serde_json::Value>().await.ok().and_then(|v| v["uptimeSeconds"].as_u64());
            Ok(DaemonStatus::Running { pid: local_pid.unwrap_or(0), uptime_seconds })
        }
        Ok(resp) => Ok(DaemonStatus::Unhealthy { pid: local_pid.unwrap_or(0), error: format!("HTTP {}", resp.status()) }),
        Err(e) => {
            if let Some(pid) = local_pid {
                if process_exists(pid) {
                    return Ok(DaemonStatus::Unhealthy { pid, error: e.to_string() });
                }
                let _ = remove_pid_file(assets_dir);
            }
            Ok(DaemonStatus::Stopped)
        }
    }
}
