// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Studio Lifecycle (C8, spec §4.3): end-to-end renderer launch, reuse, and
//! shutdown orchestration over the port allocator (C3) and process
//! discovery (C4).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::error::{BrokerError, ErrorKind, Severity, Suggestion};
use crate::domain::studio::{Project, StudioProcess};
use crate::infrastructure::port_allocator::{PortAllocator, PortError};
use crate::infrastructure::process_discovery::ProcessDiscovery;
use crate::infrastructure::process_spawner::ProcessSpawner;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const VALIDATE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub project_path: PathBuf,
    pub preferred_port: Option<u16>,
    pub force_new_instance: bool,
    pub timeout: Option<Duration>,
    pub validate: bool,
}

#[derive(Debug, Clone)]
pub struct LaunchResult {
    pub reused: bool,
    pub process: StudioProcess,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownRequest {
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub all: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownResult {
    pub terminated: Vec<u32>,
}

pub struct StudioLifecycle {
    processes: RwLock<HashMap<u32, StudioProcess>>,
    /// Owned child handles, keyed by pid. `kill_on_drop` is set on each
    /// (process_spawner.rs), so holding them here is what keeps a launched
    /// renderer alive once `launch()` returns (spec §5: "child processes are
    /// owned by the lifecycle component exclusively").
    children: RwLock<HashMap<u32, tokio::process::Child>>,
    ports: PortAllocator,
    discovery: ProcessDiscovery,
    spawner: ProcessSpawner,
    http: reqwest::Client,
}

impl StudioLifecycle {
    pub fn new(ports: PortAllocator, discovery: ProcessDiscovery, spawner: ProcessSpawner) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("reqwest client construction with static timeout never fails");
        Self { processes: RwLock::new(HashMap::new()), children: RwLock::new(HashMap::new()), ports, discovery, spawner, http }
    }

    pub async fn launch(&self, opts: LaunchOptions) -> Result<LaunchResult, BrokerError> {
        validate_project(&opts.project_path)?;

        if !opts.force_new_instance {
            if let Some(result) = self.try_reuse(&opts.project_path).await? {
                return Ok(result);
            }
        }

        let port_info = self
            .ports
            .find_available(opts.preferred_port)
            .map_err(|e| port_error(e, "launch"))?;

        let timeout = opts.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let outcome = self
            .spawner
            .launch(&opts.project_path, port_info.port, timeout)
            .await
            .map_err(|e| spawn_error(e, &opts.project_path))?;

        if opts.validate {
            self.validate_responsive(port_info.port, timeout).await?;
        }

        let project_name = opts
            .project_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let process = StudioProcess::launched(outcome.pid, port_info.port, opts.project_path.clone(), project_name);
        self.children.write().await.insert(outcome.pid, outcome.child);
        self.processes.write().await.insert(process.pid, process.clone());
        Ok(LaunchResult { reused: false, process })
    }

    /// Two matching rules (spec §4.3 step 2): exact resolved-path equality
    /// against an in-memory launched process, else exactly-one discovered
    /// renderer when none is tracked.
    async fn try_reuse(&self, project_path: &Path) -> Result<Option<LaunchResult>, BrokerError> {
        let matching_pid = {
            let processes = self.processes.read().await;
            processes.values().find(|p| p.matches_project_path(project_path)).map(|p| p.pid)
        };

        if let Some(pid) = matching_pid {
            let port = self.processes.read().await.get(&pid).map(|p| p.port);
            let responsive = match port {
                Some(port) => self.discovery.discover_by_port(port).await.is_some(),
                None => false,
            };
            if responsive {
                let process = self.processes.read().await.get(&pid).cloned().expect("just matched");
                return Ok(Some(LaunchResult { reused: true, process }));
            }
            // Unresponsive: force-kill and fall through to a fresh launch.
            let _ = self.ports.kill(pid, true);
            self.processes.write().await.remove(&pid);
            return Ok(None);
        }

        let discovered = self.discovery.discover().await;
        if discovered.renderers.len() == 1 {
            let process = discovered.renderers[0].clone();
            return Ok(Some(LaunchResult { reused: true, process }));
        }
        Ok(None)
    }

    async fn validate_responsive(&self, port: u16, timeout: Duration) -> Result<(), BrokerError> {
        let url = format!("http://127.0.0.1:{port}/");
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(response) = self.http.head(&url).send().await {
                let status = response.status();
                if status.is_success() || status.is_client_error() {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(BrokerError::new(
                    ErrorKind::Studio,
                    Severity::Error,
                    "studio_lifecycle",
                    "launch",
                    format!("renderer on port {port} never became responsive within {timeout:?}"),
                ));
            }
            tokio::time::sleep(VALIDATE_POLL_INTERVAL).await;
        }
    }

    pub async fn shutdown(&self, req: ShutdownRequest) -> ShutdownResult {
        let targets: Vec<u32> = {
            let processes = self.processes.read().await;
            processes
                .values()
                .filter(|p| {
                    req.all
                        || req.pid.map(|pid| pid == p.pid).unwrap_or(false)
                        || req.port.map(|port| port == p.port).unwrap_or(false)
                })
                .map(|p| p.pid)
                .collect()
        };

        let mut terminated = Vec::new();
        for pid in targets {
            if pid == 0 {
                continue;
            }
            let graceful = self.ports.kill(pid, false);
            if graceful.is_err() || req.force {
                let _ = self.ports.kill(pid, true);
            }
            self.processes.write().await.remove(&pid);
            self.children.write().await.remove(&pid);
            terminated.push(pid);
        }
        ShutdownResult { terminated }
    }

    pub async fn status(&self) -> Vec<StudioProcess> {
        self.processes.read().await.values().cloned().collect()
    }

    /// Drops tracked entries whose process is no longer alive (spec §4.3 `cleanup`).
    pub async fn cleanup(&self) -> Vec<u32> {
        let dead: Vec<u32> = {
            let processes = self.processes.read().await;
            processes.values().filter(|p| !self.discovery.is_alive(p.pid)).map(|p| p.pid).collect()
        };
        let mut processes = self.processes.write().await;
        let mut children = self.children.write().await;
        for pid in &dead {
            processes.remove(pid);
            children.remove(pid);
        }
        dead
    }
}

fn validate_project(path: &Path) -> Result<Project, BrokerError> {
    if !path.is_dir() {
        return Err(invalid_project(path, "the path does not exist or is not a directory"));
    }
    let project = Project { name: path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(), path: path.to_path_buf() };
    if !project.has_manifest() {
        return Err(invalid_project(path, "no package manifest (package.json) found in the project directory"));
    }
    Ok(project)
}

fn invalid_project(path: &Path, reason: &str) -> BrokerError {
    BrokerError::new(
        ErrorKind::Filesystem,
        Severity::Error,
        "studio_lifecycle",
        "launch",
        format!("invalid project at {}: {reason}", path.display()),
    )
    .with_suggestion(Suggestion::new("pass a projectPath that contains a package manifest"))
}

fn port_error(err: PortError, operation: &str) -> BrokerError {
    match err {
        PortError::PortReservedBySystem { .. } => {
            BrokerError::new(ErrorKind::Studio, Severity::Error, "studio_lifecycle", operation, err.to_string())
                .with_suggestion(Suggestion::new("pick a different preferredPort outside the system-reserved set"))
        }
        PortError::PortRangeExhausted { .. } | PortError::KillDenied { .. } => {
            BrokerError::new(ErrorKind::Studio, Severity::Error, "studio_lifecycle", operation, err.to_string())
                .with_suggestion(Suggestion::new("widen the configured port range or free the occupied port"))
        }
    }
}

fn spawn_error(err: crate::infrastructure::process_spawner::SpawnError, project_path: &Path) -> BrokerError {
    BrokerError::new(
        ErrorKind::Studio,
        Severity::Error,
        "studio_lifecycle",
        "launch",
        format!("failed to launch renderer for {}: {err}", project_path.display()),
    )
    .with_suggestion(Suggestion::new("verify the renderer CLI is installed in the project"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> StudioLifecycle {
        StudioLifecycle::new(
            PortAllocator::new(21100, 21110, vec![]),
            ProcessDiscovery::new(21100, 21110),
            ProcessSpawner::new("npx", "remotion"),
        )
    }

    #[tokio::test]
    async fn launch_rejects_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle();
        let err = lifecycle
            .launch(LaunchOptions {
                project_path: dir.path().to_path_buf(),
                preferred_port: None,
                force_new_instance: false,
                timeout: None,
                validate: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Filesystem);
    }

    #[tokio::test]
    async fn launch_with_denied_preferred_port_reports_studio_kind() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let lifecycle = StudioLifecycle::new(
            PortAllocator::new(21100, 21110, vec![21102]),
            ProcessDiscovery::new(21100, 21110),
            ProcessSpawner::new("npx", "remotion"),
        );
        let err = lifecycle
            .launch(LaunchOptions {
                project_path: dir.path().to_path_buf(),
                preferred_port: Some(21102),
                force_new_instance: false,
                timeout: None,
                validate: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Studio);
        assert!(err.message.contains("system service"));
    }

    #[tokio::test]
    async fn status_starts_empty() {
        let lifecycle = lifecycle();
        assert!(lifecycle.status().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_with_no_matching_process_terminates_nothing() {
        let lifecycle = lifecycle();
        let result = lifecycle.shutdown(ShutdownRequest { pid: Some(999_999), ..Default::default() }).await;
        assert!(result.terminated.is_empty());
    }
}
