// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Transform Pipeline (C7, spec §4.5): the chunked, checkpoint-resumable
//! state machine that cleans, validates, and exports a composition source,
//! backed by the checkpoint store (C6) and the source validator (C5).

use std::time::{Duration, Instant};

use crate::domain::checkpoint::{Checkpoint, Stage};
use crate::domain::error::{BrokerError, ErrorKind, Severity, Suggestion};
use crate::domain::source_validator;
use crate::infrastructure::checkpoint_store::CheckpointStore;
use std::sync::Arc;

const DEFAULT_CHUNK_SIZE: usize = 500;
const DEFAULT_YIELD_EVERY: usize = 3;
const DEFAULT_STAGE_BUDGET: Duration = Duration::from_secs(8);
/// How close to the stage budget triggers a checkpoint-and-pause rather than
/// pressing on (spec §4.5 "within a small margin of expiry").
const BUDGET_MARGIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub operation_id: String,
    pub project_name: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub output: String,
    pub duplicate_exports: Vec<String>,
}

pub struct TransformPipeline {
    checkpoints: Arc<CheckpointStore>,
    chunk_size: usize,
    yield_every: usize,
    stage_budget: Duration,
}

impl TransformPipeline {
    pub fn new(checkpoints: Arc<CheckpointStore>) -> Self {
        Self { checkpoints, chunk_size: DEFAULT_CHUNK_SIZE, yield_every: DEFAULT_YIELD_EVERY, stage_budget: DEFAULT_STAGE_BUDGET }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_stage_budget(mut self, budget: Duration) -> Self {
        self.stage_budget = budget;
        self
    }

    /// Runs (or resumes) a transform keyed by `operationId`. The caller MUST
    /// NOT run two concurrent transforms with the same operationId (spec §5
    /// cancellation semantics) — this method does not itself guard against it.
    pub async fn transform(&self, request: TransformRequest) -> Result<TransformOutcome, BrokerError> {
        let mut checkpoint = match self.checkpoints.get(&request.operation_id).await {
            Some(cp) => cp,
            None => Checkpoint::new(request.operation_id.clone(), request.project_name.clone(), request.source.clone()),
        };

        loop {
            match checkpoint.stage {
                Stage::Backup => {
                    // Actual file backup is a filesystem-adapter concern outside this
                    // pipeline's scope; here the stage only marks the transform as begun.
                    checkpoint.advance(Stage::JsxCleaning, 10);
                    self.checkpoints.put(checkpoint.clone()).await;
                }
                Stage::JsxCleaning => {
                    self.run_jsx_cleaning(&mut checkpoint).await?;
                }
                Stage::JsxValidation => {
                    self.run_jsx_validation(&mut checkpoint).await?;
                }
                Stage::JsxExport => {
                    self.run_jsx_export(&mut checkpoint).await?;
                }
                Stage::FileWriting => {
                    // Writing the emitted source to disk is a filesystem-adapter
                    // concern; this stage exists so observers see the full state
                    // progression spec §4.5 defines.
                    checkpoint.advance(Stage::Completed, 100);
                    self.checkpoints.put(checkpoint.clone()).await;
                }
                Stage::Completed => {
                    let output = checkpoint.payload.partial_output.clone();
                    let _ = self.checkpoints.remove(&checkpoint.operation_id).await;
                    return Ok(TransformOutcome { output, duplicate_exports: Vec::new() });
                }
            }
        }
    }

    /// Partitions the original source into fixed-size chunks and applies
    /// bounded-time textual cleanup to each, persisting progress every
    /// `yield_every` chunks (spec §4.5 "Chunked cleaning").
    async fn run_jsx_cleaning(&self, checkpoint: &mut Checkpoint) -> Result<(), BrokerError> {
        let source = checkpoint.payload.original_source.clone();
        let chunks: Vec<&str> = chunk_str(&source, self.chunk_size);
        checkpoint.payload.total_chunks = chunks.len();

        if checkpoint.payload.shards.len() != checkpoint.payload.current_chunk_index {
            tracing::warn!(
                operation_id = %checkpoint.operation_id,
                shards = checkpoint.payload.shards.len(),
                chunk_index = checkpoint.payload.current_chunk_index,
                "checkpoint shard count mismatch, resetting jsx_cleaning progress"
            );
            checkpoint.payload.shards.clear();
            checkpoint.payload.current_chunk_index = 0;
        }

        let stage_started = Instant::now();
        let mut since_yield = 0usize;

        while checkpoint.payload.current_chunk_index < chunks.len() {
            let idx = checkpoint.payload.current_chunk_index;
            let cleaned = clean_chunk(chunks[idx]);
            checkpoint.payload.shards.push(cleaned);
            checkpoint.payload.current_chunk_index += 1;
            since_yield += 1;

            let progress = if chunks.is_empty() { 50 } else { 10 + (30 * checkpoint.payload.current_chunk_index / chunks.len().max(1)) as u8 };
            checkpoint.progress = progress.min(40);

            if since_yield >= self.yield_every {
                since_yield = 0;
                tokio::task::yield_now().await;
                self.checkpoints.put(checkpoint.clone()).await;
            }

            if stage_started.elapsed() + BUDGET_MARGIN >= self.stage_budget {
                self.checkpoints.put(checkpoint.clone()).await;
                return Err(BrokerError::resumable_timeout(checkpoint.operation_id.clone(), Stage::JsxCleaning));
            }
        }

        checkpoint.payload.partial_output = checkpoint.payload.shards.join("");
        checkpoint.advance(Stage::JsxValidation, 40);
        self.checkpoints.put(checkpoint.clone()).await;
        Ok(())
    }

    /// Runs the source-validator's three deterministic passes, then a
    /// lightweight structural check; failure is terminal (spec §4.5
    /// "Validation stage" — no retry).
    async fn run_jsx_validation(&self, checkpoint: &mut Checkpoint) -> Result<(), BrokerError> {
        let report = source_validator::repair(&checkpoint.payload.partial_output);
        checkpoint.payload.partial_output = report.source;

        if let Err(reason) = structural_check(&checkpoint.payload.partial_output) {
            let _ = self.checkpoints.remove(&checkpoint.operation_id).await;
            return Err(BrokerError::new(
                ErrorKind::Validation,
                Severity::Error,
                "transform_pipeline",
                "jsx_validation",
                format!("validation failed for {}: {reason}", checkpoint.operation_id),
            )
            .with_suggestion(Suggestion::new("inspect the emitted source; this operationId cannot be retried")));
        }

        checkpoint.advance(Stage::JsxExport, 70);
        self.checkpoints.put(checkpoint.clone()).await;
        Ok(())
    }

    /// Appends `export default X;` when missing (spec §4.5 "Export stage").
    /// Idempotent: running it twice on its own output is a no-op.
    async fn run_jsx_export(&self, checkpoint: &mut Checkpoint) -> Result<(), BrokerError> {
        let source = &checkpoint.payload.partial_output;
        if !source.contains("export default") {
            if let Some(name) = detect_component_name(source) {
                checkpoint.payload.partial_output = format!("{source}\nexport default {name};\n");
            }
        }
        checkpoint.advance(Stage::FileWriting, 90);
        self.checkpoints.put(checkpoint.clone()).await;
        Ok(())
    }
}

fn chunk_str(source: &str, chunk_size: usize) -> Vec<&str> {
    let bytes = source.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let mut end = (start + chunk_size).min(bytes.len());
        while end < bytes.len() && !source.is_char_boundary(end) {
            end += 1;
        }
        chunks.push(&source[start..end]);
        start = end;
    }
    if chunks.is_empty() {
        chunks.push(source);
    }
    chunks
}

/// Bounded-time per-chunk cleanup: strips trailing whitespace per line and
/// collapses runs of 3+ blank lines to 2 (spec §4.5: no nested quantifiers,
/// no catastrophic-backtracking-prone regex).
fn clean_chunk(chunk: &str) -> String {
    let mut out = String::with_capacity(chunk.len());
    let mut blank_run = 0usize;
    for line in chunk.split_inclusive('\n') {
        let (content, newline) = match line.strip_suffix('\n') {
            Some(c) => (c, true),
            None => (line, false),
        };
        let trimmed = content.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(trimmed);
        if newline {
            out.push('\n');
        }
    }
    out
}

/// Structural check from spec §4.5 "Validation stage": presence of a return
/// statement, JSX, a function/const/arrow declaration, brace balance within
/// ±2, and (optionally) an export.
fn structural_check(source: &str) -> Result<(), String> {
    if !source.contains("return") {
        return Err("no return statement found".to_string());
    }
    if !source.contains('<') || !source.contains('>') {
        return Err("no JSX angle brackets found".to_string());
    }
    let has_decl = source.contains("function ") || source.contains("const ") || source.contains("=>");
    if !has_decl {
        return Err("no function/const/arrow declaration found".to_string());
    }
    let open = source.matches('{').count() as i64;
    let close = source.matches('}').count() as i64;
    if (open - close).abs() > 2 {
        return Err(format!("brace balance out of tolerance: {open} open vs {close} close"));
    }
    Ok(())
}

/// Detects a component name via `function X` or `const X :?=` (spec §4.5
/// "Export stage").
fn detect_component_name(source: &str) -> Option<String> {
    if let Some(rest) = source.split("function ").nth(1) {
        let name: String = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
        if !name.is_empty() {
            return Some(name);
        }
    }
    for line in source.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("const ") {
            let name: String = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
            let after_name = rest[name.len()..].trim_start();
            if !name.is_empty() && (after_name.starts_with('=') || after_name.starts_with(':')) {
                return Some(name);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> (TransformPipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path().join("checkpoints.json")));
        (TransformPipeline::new(store), dir)
    }

    fn sample_source() -> String {
        r#"
const VideoComposition = () => {
  return <AbsoluteFill>hello</AbsoluteFill>;
};
"#
        .to_string()
    }

    #[tokio::test]
    async fn completes_and_appends_default_export() {
        let (pipeline, _dir) = pipeline();
        let result = pipeline
            .transform(TransformRequest {
                operation_id: "op-1".to_string(),
                project_name: "alpha".to_string(),
                source: sample_source(),
            })
            .await
            .unwrap();
        assert!(result.output.contains("export default VideoComposition;"));
    }

    #[tokio::test]
    async fn missing_return_fails_validation_and_is_not_retryable() {
        let (pipeline, _dir) = pipeline();
        let broken = "const X = () => { <div>nothing here</div> };".to_string();
        let err = pipeline
            .transform(TransformRequest { operation_id: "op-2".to_string(), project_name: "alpha".to_string(), source: broken })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(pipeline.checkpoints.get("op-2").await.is_none());
    }

    #[tokio::test]
    async fn tiny_stage_budget_raises_resumable_timeout_then_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path().join("checkpoints.json")));
        let pipeline = TransformPipeline::new(store.clone()).with_chunk_size(5).with_stage_budget(Duration::from_millis(1));

        let request = TransformRequest { operation_id: "op-3".to_string(), project_name: "alpha".to_string(), source: sample_source() };
        let first = pipeline.transform(request.clone()).await.unwrap_err();
        assert!(first.is_resumable_timeout());
        assert!(store.get("op-3").await.is_some());

        let pipeline = TransformPipeline::new(store.clone());
        let result = pipeline.transform(request).await.unwrap();
        assert!(result.output.contains("export default"));
    }

    #[test]
    fn clean_chunk_trims_trailing_whitespace_and_collapses_blank_runs() {
        let input = "a   \n\n\n\nb";
        let cleaned = clean_chunk(input);
        assert_eq!(cleaned, "a\n\n\nb");
    }

    #[test]
    fn structural_check_flags_unbalanced_braces() {
        let source = "const X = () => { return <div>{{{{{</div>; }";
        assert!(structural_check(source).is_err());
    }
}
