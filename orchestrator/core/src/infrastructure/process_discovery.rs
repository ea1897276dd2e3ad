// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Process Discovery (C4, spec §4.2): identifies live renderer instances by
//! HTTP scanning of a port range.

use std::time::Duration;

use thiserror::Error;

use crate::domain::studio::{PortConflict, PortInfo, StudioProcess};

/// Case-insensitive substrings that mark an HTTP response body as coming
/// from the renderer (spec §4.2).
const RENDERER_SIGNATURES: &[&str] = &["remotion", "webpack", "__webpack", "composition"];

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to probe port {port}: {source}")]
    ProbeFailed { port: u16, source: String },
}

#[derive(Debug, Default)]
pub struct DiscoveryResult {
    pub total: usize,
    pub renderers: Vec<StudioProcess>,
    pub other: Vec<StudioProcess>,
    pub conflicts: Vec<PortInfo>,
}

pub struct ProcessDiscovery {
    client: reqwest::Client,
    range_start: u16,
    range_end: u16,
}

impl ProcessDiscovery {
    pub fn new(range_start: u16, range_end: u16) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("reqwest client construction with static timeout never fails");
        Self { client, range_start, range_end }
    }

    /// Sequential scan of the configured range (spec §4.2: implementations
    /// MAY parallelize with bounded fan-out, but total time must not exceed
    /// range × timeout worst case; sequential trivially satisfies that).
    pub async fn discover(&self) -> DiscoveryResult {
        let mut result = DiscoveryResult::default();
        for port in self.range_start..=self.range_end {
            result.total += 1;
            match self.probe(port).await {
                Some(body) => {
                    let process = StudioProcess::discovered(port, extract_project_name(&body));
                    if is_renderer_response(&body) {
                        result.renderers.push(process);
                    } else {
                        result.other.push(process);
                    }
                }
                None => continue,
            }
        }
        result
    }

    pub async fn discover_by_port(&self, port: u16) -> Option<StudioProcess> {
        let body = self.probe(port).await?;
        Some(StudioProcess::discovered(port, extract_project_name(&body)))
    }

    async fn probe(&self, port: u16) -> Option<String> {
        let url = format!("http://127.0.0.1:{port}/");
        let response = self.client.get(&url).send().await.ok()?;
        response.text().await.ok()
    }

    /// Signal-0 probe: checks process liveness without sending a real
    /// signal (spec §4.2 `isAlive`).
    #[cfg(unix)]
    pub fn is_alive(&self, pid: u32) -> bool {
        let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
        result == 0
    }

    #[cfg(not(unix))]
    pub fn is_alive(&self, _pid: u32) -> bool {
        false
    }
}

fn is_renderer_response(body: &str) -> bool {
    let lower = body.to_lowercase();
    RENDERER_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Best-effort scrape of the `<title>` element; absence is not an error
/// (spec §4.2).
fn extract_project_name(body: &str) -> Option<String> {
    let start = body.find("<title>")? + "<title>".len();
    let end = body[start..].find("</title>")? + start;
    let title = body[start..end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

pub fn classify_conflict(port_info: PortInfo, description: impl Into<String>) -> PortInfo {
    PortInfo {
        conflict: Some(PortConflict {
            occupant_pid: port_info.conflict.as_ref().and_then(|c| c.occupant_pid),
            is_system_service: false,
            description: description.into(),
        }),
        ..port_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_remotion_signature_case_insensitively() {
        assert!(is_renderer_response("<html>REMOTION studio running</html>"));
        assert!(is_renderer_response("bundled via __webpack_require__"));
        assert!(!is_renderer_response("<html>just a webserver</html>"));
    }

    #[test]
    fn extracts_title_when_present() {
        let body = "<html><head><title>alpha</title></head></html>";
        assert_eq!(extract_project_name(body).as_deref(), Some("alpha"));
    }

    #[test]
    fn missing_title_is_not_an_error() {
        let body = "<html><body>no head</body></html>";
        assert_eq!(extract_project_name(body), None);
    }
}
