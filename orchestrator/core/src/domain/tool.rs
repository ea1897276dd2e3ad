// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Tool domain type (spec §3, §4.8).
//!
//! A [`Tool`] is a named operation the broker can expose to the host. This
//! module owns only the value object and its invariants; the active-subset
//! bookkeeping and handler dispatch live in
//! [`crate::application::tool_registry`], mirroring the split the teacher
//! keeps between `domain::mcp::ToolServer` (what a server *is*) and
//! `infrastructure::tool_router` (how servers are found and invoked).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed category enumeration (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCategory {
    Discovery,
    CoreOperations,
    VideoCreation,
    StudioManagement,
    VoiceGeneration,
    SoundEffects,
    ImageGeneration,
    Maintenance,
}

impl ToolCategory {
    /// Tools of category `discovery` are permanently active (spec §3 invariant).
    pub fn is_permanently_active(self) -> bool {
        matches!(self, ToolCategory::Discovery)
    }

    pub const ALL: [ToolCategory; 8] = [
        ToolCategory::Discovery,
        ToolCategory::CoreOperations,
        ToolCategory::VideoCreation,
        ToolCategory::StudioManagement,
        ToolCategory::VoiceGeneration,
        ToolCategory::SoundEffects,
        ToolCategory::ImageGeneration,
        ToolCategory::Maintenance,
    ];
}

/// A named, schema-bearing operation exposed to the host.
///
/// Names are globally unique (enforced by the registry on `register`); a
/// `Tool` is never destroyed once registered, only activated/deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub category: ToolCategory,
    pub sub_category: Option<String>,
    /// Lower values sort earlier in listing order (spec §4.8).
    pub priority: i32,
    /// Nominal token cost attributed when this tool is active (spec §3).
    pub context_weight: u32,
    pub tags: HashSet<String>,
    pub required_credential: Option<String>,
    pub load_by_default: bool,
    #[serde(skip)]
    usage_count: std::sync::Arc<AtomicU64>,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        category: ToolCategory,
        priority: i32,
        context_weight: u32,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            category,
            sub_category: None,
            priority,
            context_weight,
            tags: HashSet::new(),
            required_credential: None,
            load_by_default: false,
            usage_count: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_sub_category(mut self, sub: impl Into<String>) -> Self {
        self.sub_category = Some(sub.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.required_credential = Some(credential.into());
        self
    }

    pub fn load_by_default(mut self, yes: bool) -> Self {
        self.load_by_default = yes;
        self
    }

    /// Whether this tool's required credential (if any) is present.
    pub fn has_credential(&self, env_lookup: impl Fn(&str) -> bool) -> bool {
        match &self.required_credential {
            Some(var) => env_lookup(var),
            None => true,
        }
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Relaxed)
    }

    pub fn record_usage(&self) -> u64 {
        self.usage_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Restore a usage count loaded from the persisted stats file.
    pub fn set_usage_count(&self, count: u64) {
        self.usage_count.store(count, Ordering::Relaxed);
    }

    /// Case-insensitive match over name, description, and tags, used by
    /// `ToolRegistry::search` (spec §4.8).
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_is_permanently_active() {
        assert!(ToolCategory::Discovery.is_permanently_active());
        assert!(!ToolCategory::VideoCreation.is_permanently_active());
    }

    #[test]
    fn usage_count_is_monotonic() {
        let tool = Tool::new("t", "d", serde_json::json!({}), ToolCategory::Maintenance, 10, 5);
        assert_eq!(tool.usage_count(), 0);
        assert_eq!(tool.record_usage(), 1);
        assert_eq!(tool.record_usage(), 2);
        assert_eq!(tool.usage_count(), 2);
    }

    #[test]
    fn credential_gate() {
        let tool = Tool::new("t", "d", serde_json::json!({}), ToolCategory::VoiceGeneration, 1, 1)
            .with_credential("ELEVENLABS_API_KEY");
        assert!(!tool.has_credential(|_| false));
        assert!(tool.has_credential(|v| v == "ELEVENLABS_API_KEY"));
    }

    #[test]
    fn search_is_case_insensitive() {
        let tool = Tool::new("Create-Video", "Renders a Composition", serde_json::json!({}), ToolCategory::VideoCreation, 1, 1)
            .with_tags(["Render"]);
        assert!(tool.matches_query("composition"));
        assert!(tool.matches_query("RENDER"));
        assert!(!tool.matches_query("nonexistent"));
    }
}
