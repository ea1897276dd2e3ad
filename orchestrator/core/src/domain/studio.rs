// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Studio process / port / project domain types (spec §3, §4.1–§4.3).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a [`StudioProcess`] was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    /// Spawned by this broker process; pid is known.
    Launched,
    /// Found by HTTP signature scan; pid is unknown (spec §3: "0 if discovered via HTTP only").
    HttpScan,
}

/// Descriptor of a discovered or launched renderer (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioProcess {
    pub pid: u32,
    pub port: u16,
    pub responsive: bool,
    pub project_path: Option<PathBuf>,
    pub project_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
    pub discovery_method: DiscoveryMethod,
}

impl StudioProcess {
    pub fn launched(pid: u32, port: u16, project_path: PathBuf, project_name: String) -> Self {
        let now = Utc::now();
        Self {
            pid,
            port,
            responsive: true,
            project_path: Some(project_path),
            project_name: Some(project_name),
            started_at: now,
            last_observed_at: now,
            discovery_method: DiscoveryMethod::Launched,
        }
    }

    pub fn discovered(port: u16, project_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            pid: 0,
            port,
            responsive: true,
            project_path: None,
            project_name,
            started_at: now,
            last_observed_at: now,
            discovery_method: DiscoveryMethod::HttpScan,
        }
    }

    /// Resolved-path equality rule from spec §4.3 step 2 ("exact resolved-path equality").
    pub fn matches_project_path(&self, path: &Path) -> bool {
        match &self.project_path {
            Some(p) => paths_equal(p, path),
            None => false,
        }
    }
}

fn paths_equal(a: &Path, b: &Path) -> bool {
    let canon = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    canon(a) == canon(b)
}

/// Short-lived port allocation state (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortInfo {
    pub port: u16,
    pub available: bool,
    pub conflict: Option<PortConflict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConflict {
    pub occupant_pid: Option<u32>,
    pub is_system_service: bool,
    pub description: String,
}

/// On-disk renderer package, identifiable by the presence of a package
/// manifest (spec §3). Name maps to path via a pure join — no in-memory
/// lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
}

impl Project {
    /// Pure join of a projects root directory and a project name (spec §3).
    pub fn resolve(projects_dir: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: projects_dir.join(name),
        }
    }

    pub fn has_manifest(&self) -> bool {
        self.path.join("package.json").is_file()
    }

    pub fn composition_source_path(&self, extension: &str) -> PathBuf {
        self.path.join("src").join(format!("VideoComposition.{extension}"))
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.path.join(".backups")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_path_is_pure_join() {
        let p = Project::resolve(Path::new("/projects"), "alpha");
        assert_eq!(p.path, PathBuf::from("/projects/alpha"));
    }

    #[test]
    fn discovered_process_has_zero_pid() {
        let sp = StudioProcess::discovered(3000, Some("alpha".into()));
        assert_eq!(sp.pid, 0);
        assert_eq!(sp.discovery_method, DiscoveryMethod::HttpScan);
    }
}
