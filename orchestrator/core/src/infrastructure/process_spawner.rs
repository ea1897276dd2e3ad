// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Child-process spawning for the renderer (part of C8, spec §4.3 step 4).
//! Where the teacher's `infrastructure::runtime::DockerRuntime` shells out to
//! a container daemon, this spawns the renderer directly with
//! `tokio::process::Command` — the command shape spec §6 gives is a bare
//! package-runner invocation, not a container image.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

const MAX_STARTUP_ATTEMPTS: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error(
        "failed to spawn renderer process for {project_path:?}: {source}\n\n\
         Common causes:\n\
         - the package runner ({runner}) is not on PATH\n\
         - the project directory is missing a package manifest\n\
         - a shell-parsed package-manager shim requires `shell: true` on this platform"
    )]
    SpawnFailed { project_path: std::path::PathBuf, runner: String, source: String },

    #[error("renderer did not become ready within {0:?}; process was killed")]
    StartupTimeout(Duration),

    #[error("renderer reported a fatal error on startup: {0}")]
    FatalStderr(String),

    #[error("exhausted {MAX_STARTUP_ATTEMPTS} startup attempts for {0:?}")]
    AttemptsExhausted(std::path::PathBuf),
}

/// Substrings on stdout that indicate the renderer is ready (spec §4.3 step 4a).
const READINESS_TOKENS: &[&str] = &["ready", "server running"];

/// `error` combined with any of these on stderr is fatal (spec §4.3 step 4b).
const FATAL_COMPANIONS: &[&str] = &["fatal", "cannot", "failed"];

pub struct SpawnOutcome {
    pub child: Child,
    pub pid: u32,
}

pub struct ProcessSpawner {
    package_runner: String,
    renderer_cli: String,
}

impl ProcessSpawner {
    pub fn new(package_runner: impl Into<String>, renderer_cli: impl Into<String>) -> Self {
        Self { package_runner: package_runner.into(), renderer_cli: renderer_cli.into() }
    }

    /// Launch-attempt loop: spawns the renderer up to `MAX_STARTUP_ATTEMPTS`
    /// times, waiting for a readiness signal each time (spec §4.3 step 4).
    pub async fn launch(
        &self,
        project_path: &Path,
        port: u16,
        timeout: Duration,
    ) -> Result<SpawnOutcome, SpawnError> {
        let mut last_err = None;
        for _attempt in 0..MAX_STARTUP_ATTEMPTS {
            match self.attempt_launch(project_path, port, timeout).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| SpawnError::AttemptsExhausted(project_path.to_path_buf())))
    }

    async fn attempt_launch(
        &self,
        project_path: &Path,
        port: u16,
        timeout: Duration,
    ) -> Result<SpawnOutcome, SpawnError> {
        let timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
        let mut command = Command::new(&self.package_runner);
        command
            .arg(&self.renderer_cli)
            .arg("studio")
            .arg("--port")
            .arg(port.to_string())
            .current_dir(project_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Package-manager shims on some platforms are themselves shell
        // scripts/batch files and need shell parsing to resolve (spec §4.3).
        #[cfg(windows)]
        {
            let mut shell = Command::new("cmd");
            shell.arg("/C").arg(format!(
                "{} {} studio --port {port}",
                self.package_runner, self.renderer_cli
            ));
            shell.current_dir(project_path).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
            command = shell;
        }

        let mut child = command.spawn().map_err(|e| SpawnError::SpawnFailed {
            project_path: project_path.to_path_buf(),
            runner: self.package_runner.clone(),
            source: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| SpawnError::SpawnFailed {
            project_path: project_path.to_path_buf(),
            runner: self.package_runner.clone(),
            source: "process exited immediately after spawn".to_string(),
        })?;

        let stdout = child.stdout.take().expect("piped stdout configured above");
        let stderr = child.stderr.take().expect("piped stderr configured above");

        let deadline = Instant::now() + timeout;
        let half_timeout = timeout / 2;
        let spawned_at = Instant::now();

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        loop {
            if Instant::now() >= deadline {
                let _ = child.kill().await;
                return Err(SpawnError::StartupTimeout(timeout));
            }

            tokio::select! {
                line = stdout_lines.next_line() => {
                    if let Ok(Some(line)) = line {
                        let lower = line.to_lowercase();
                        if READINESS_TOKENS.iter().any(|t| lower.contains(t))
                            || lower.contains(&format!("localhost:{port}"))
                        {
                            return Ok(SpawnOutcome { child, pid });
                        }
                    }
                }
                line = stderr_lines.next_line() => {
                    if let Ok(Some(line)) = line {
                        let lower = line.to_lowercase();
                        if lower.contains("error") && FATAL_COMPANIONS.iter().any(|c| lower.contains(c)) {
                            let _ = child.kill().await;
                            return Err(SpawnError::FatalStderr(line));
                        }
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    if spawned_at.elapsed() >= half_timeout {
                        if let Ok(None) = child.try_wait() {
                            // Still alive past half the budget with no fatal stderr: accept liveness
                            // as readiness (spec §4.3 step 4a option b).
                            return Ok(SpawnOutcome { child, pid });
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_tokens_are_case_insensitive() {
        let line = "Server Running on localhost:3000".to_lowercase();
        assert!(READINESS_TOKENS.iter().any(|t| line.contains(t)));
    }

    #[test]
    fn fatal_stderr_requires_error_and_companion() {
        let fatal = "error: cannot bind to port".to_lowercase();
        assert!(fatal.contains("error") && FATAL_COMPANIONS.iter().any(|c| fatal.contains(c)));
        let benign = "warning: deprecated flag".to_lowercase();
        assert!(!(benign.contains("error") && FATAL_COMPANIONS.iter().any(|c| benign.contains(c))));
    }
}
