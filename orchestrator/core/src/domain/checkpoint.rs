// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Checkpoint domain type for the resumable transform pipeline (spec §3, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transform pipeline stage. Declared ordering is the only legal progression
/// direction (spec §3 invariant "stage progression is monotonic").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Backup,
    JsxCleaning,
    JsxValidation,
    JsxExport,
    FileWriting,
    Completed,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        use Stage::*;
        match self {
            Backup => Some(JsxCleaning),
            JsxCleaning => Some(JsxValidation),
            JsxValidation => Some(JsxExport),
            JsxExport => Some(FileWriting),
            FileWriting => Some(Completed),
            Completed => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Backup => "backup",
            Stage::JsxCleaning => "jsx_cleaning",
            Stage::JsxValidation => "jsx_validation",
            Stage::JsxExport => "jsx_export",
            Stage::FileWriting => "file_writing",
            Stage::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Payload carried by a checkpoint: enough to resume exactly where a
/// transform left off (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub original_source: String,
    pub partial_output: String,
    pub current_chunk_index: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub shards: Vec<String>,
}

/// Persisted state of one in-flight transformation, keyed by `operation_id`
/// (spec §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub operation_id: String,
    pub project_name: String,
    pub stage: Stage,
    /// Invariant: progress ∈ [0,100] (spec §3).
    pub progress: u8,
    pub payload: CheckpointPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(operation_id: impl Into<String>, project_name: impl Into<String>, original_source: String) -> Self {
        let now = Utc::now();
        Self {
            operation_id: operation_id.into(),
            project_name: project_name.into(),
            stage: Stage::Backup,
            progress: 0,
            payload: CheckpointPayload {
                original_source,
                partial_output: String::new(),
                current_chunk_index: 0,
                total_chunks: 0,
                shards: Vec::new(),
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance stage and progress; panics in debug builds if callers try to
    /// move the stage backward, matching the "monotonic" invariant.
    pub fn advance(&mut self, stage: Stage, progress: u8) {
        debug_assert!(stage >= self.stage, "checkpoint stage must not regress");
        self.stage = stage;
        self.progress = progress.min(100);
        self.updated_at = Utc::now();
    }

    pub fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        now - self.created_at > retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_ordering_is_monotonic() {
        assert!(Stage::Backup < Stage::JsxCleaning);
        assert!(Stage::JsxCleaning < Stage::Completed);
    }

    #[test]
    fn advance_updates_progress_and_stage() {
        let mut cp = Checkpoint::new("op-1", "proj", "source".to_string());
        cp.advance(Stage::JsxCleaning, 40);
        assert_eq!(cp.stage, Stage::JsxCleaning);
        assert_eq!(cp.progress, 40);
    }

    #[test]
    fn expiry_uses_created_at() {
        let mut cp = Checkpoint::new("op-1", "proj", "s".to_string());
        cp.created_at = Utc::now() - chrono::Duration::hours(25);
        assert!(cp.is_expired(Utc::now(), chrono::Duration::hours(24)));
    }
}
