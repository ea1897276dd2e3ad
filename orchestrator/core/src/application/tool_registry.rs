// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Tool Registry (C11, spec §4.8): the catalog of all tools plus the
//! currently-active subset exposed to the host. Exclusively owns `Tool`
//! objects and their active-subset membership (spec §3) — the layer manager
//! only ever references tools by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::error::{BrokerError, ErrorKind, Severity, Suggestion};
use crate::domain::events::ToolEvent;
use crate::domain::tool::{Tool, ToolCategory};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::usage_store::UsageStore;

/// A tool's invocation behavior. Handlers are looked up by name regardless
/// of activation state — activation gates listing, not execution (spec §4.8).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, BrokerError>;
}

struct RegisteredTool {
    tool: Tool,
    handler: Arc<dyn ToolHandler>,
    active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub categories: Vec<ToolCategory>,
    pub tags: Vec<String>,
    pub has_credential: Option<bool>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivateCategoriesRequest {
    pub categories: Vec<ToolCategory>,
    pub tools: Vec<String>,
    pub exclusive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ActivateResult {
    pub activated: Vec<String>,
    pub skipped_missing_credential: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a tool named '{0}' is already registered")]
    DuplicateName(String),
    #[error("no tool named '{0}' is registered")]
    UnknownTool(String),
}

/// Static keyword → tool-name suggestion map (spec §4.8 "Suggest").
fn suggestion_keywords() -> &'static HashMap<&'static str, &'static [&'static str]> {
    static MAP: std::sync::OnceLock<HashMap<&'static str, &'static [&'static str]>> = std::sync::OnceLock::new();
    MAP.get_or_init(|| {
        let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        m.insert("video", &["create-complete-video", "render-composition", "export-video"]);
        m.insert("studio", &["launch-remotion-studio", "shutdown-studio", "studio-status"]);
        m.insert("voice", &["generate-voiceover", "list-voices"]);
        m.insert("sound", &["generate-sound-effect"]);
        m.insert("image", &["generate-image"]);
        m.insert("cleanup", &["cleanup-studio", "purge-checkpoints"]);
        m
    })
}

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    usage: Arc<UsageStore>,
    events: Arc<EventBus>,
}

impl ToolRegistry {
    pub fn new(usage: Arc<UsageStore>, events: Arc<EventBus>) -> Self {
        Self { tools: RwLock::new(HashMap::new()), usage, events }
    }

    pub async fn register(&self, tool: Tool, handler: Arc<dyn ToolHandler>) -> Result<(), RegistryError> {
        let mut tools = self.tools.write().await;
        if tools.contains_key(&tool.name) {
            return Err(RegistryError::DuplicateName(tool.name));
        }
        let restored_count = self.usage.get(&tool.name).await;
        if restored_count > 0 {
            tool.set_usage_count(restored_count);
        }
        let active = tool.category.is_permanently_active() || tool.load_by_default;
        tools.insert(tool.name.clone(), RegisteredTool { tool, handler, active });
        Ok(())
    }

    /// Returns regardless of active state (spec §4.8: "activation gates
    /// listing, not execution").
    pub async fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.read().await.get(name).map(|r| r.handler.clone())
    }

    /// Stable order by priority ascending, then usage descending (spec §4.8).
    pub async fn active(&self) -> Vec<Tool> {
        let tools = self.tools.read().await;
        let mut active: Vec<&Tool> = tools.values().filter(|r| r.active).map(|r| &r.tool).collect();
        active.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.usage_count().cmp(&a.usage_count())));
        active.into_iter().cloned().collect()
    }

    pub async fn categories(&self) -> Vec<ToolCategory> {
        let tools = self.tools.read().await;
        let mut seen: Vec<ToolCategory> = Vec::new();
        for r in tools.values() {
            if !seen.contains(&r.tool.category) {
                seen.push(r.tool.category);
            }
        }
        seen
    }

    pub async fn usage_stats(&self) -> HashMap<String, u64> {
        self.usage.snapshot().await
    }

    /// Forces an immediate usage-stats write, bypassing the debounce window
    /// (SPEC_FULL "Graceful shutdown").
    pub async fn flush_usage_stats(&self) {
        self.usage.flush().await;
    }

    /// Activates tools by category and/or explicit name, skipping any whose
    /// required credential is absent (with a warning, not a failure).
    pub async fn activate_categories(&self, request: ActivateCategoriesRequest) -> ActivateResult {
        let mut tools = self.tools.write().await;
        let mut activated = Vec::new();
        let mut skipped = Vec::new();

        if request.exclusive {
            for r in tools.values_mut() {
                if !r.tool.category.is_permanently_active() {
                    r.active = false;
                }
            }
        }

        let names_to_consider: Vec<String> = tools
            .values()
            .filter(|r| request.categories.contains(&r.tool.category) || request.tools.contains(&r.tool.name))
            .map(|r| r.tool.name.clone())
            .collect();

        for name in names_to_consider {
            if let Some(r) = tools.get_mut(&name) {
                if r.tool.has_credential(env_var_present) {
                    r.active = true;
                    activated.push(name);
                } else {
                    tracing::warn!(tool = %name, "skipping activation: required credential missing");
                    skipped.push(name);
                }
            }
        }

        ActivateResult { activated, skipped_missing_credential: skipped }
    }

    pub async fn activate_sub_category(&self, category: ToolCategory, sub: &str, exclusive: bool) -> ActivateResult {
        let mut tools = self.tools.write().await;
        let mut activated = Vec::new();
        let mut skipped = Vec::new();

        if exclusive {
            for r in tools.values_mut() {
                if !r.tool.category.is_permanently_active() {
                    r.active = false;
                }
            }
        }

        for r in tools.values_mut() {
            if r.tool.category == category && r.tool.sub_category.as_deref() == Some(sub) {
                if r.tool.has_credential(env_var_present) {
                    r.active = true;
                    activated.push(r.tool.name.clone());
                } else {
                    skipped.push(r.tool.name.clone());
                }
            }
        }

        ActivateResult { activated, skipped_missing_credential: skipped }
    }

    /// Tools of category `discovery` are permanently active and are silently
    /// skipped here rather than erroring (spec §4.8 invariant).
    pub async fn deactivate(&self, names: &[String]) -> Vec<String> {
        let mut tools = self.tools.write().await;
        let mut deactivated = Vec::new();
        for name in names {
            if let Some(r) = tools.get_mut(name) {
                if r.tool.category.is_permanently_active() {
                    continue;
                }
                r.active = false;
                deactivated.push(name.clone());
            }
        }
        deactivated
    }

    pub async fn search(&self, query: SearchQuery) -> Vec<Tool> {
        let tools = self.tools.read().await;
        let mut results: Vec<&Tool> = tools
            .values()
            .map(|r| &r.tool)
            .filter(|t| query.query.as_deref().map(|q| t.matches_query(q)).unwrap_or(true))
            .filter(|t| query.categories.is_empty() || query.categories.contains(&t.category))
            .filter(|t| query.tags.is_empty() || query.tags.iter().any(|tag| t.tags.contains(tag)))
            .filter(|t| {
                query
                    .has_credential
                    .map(|want| t.has_credential(env_var_present) == want)
                    .unwrap_or(true)
            })
            .collect();

        results.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.usage_count().cmp(&a.usage_count())));
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        results.into_iter().cloned().collect()
    }

    /// Static keyword → tool-name map, deduplicated and filtered to names
    /// that are actually registered (spec §4.8 "Suggest").
    pub async fn suggest(&self, context: &str) -> Vec<String> {
        let tools = self.tools.read().await;
        let context = context.to_lowercase();
        let mut suggestions = Vec::new();
        for (keyword, names) in suggestion_keywords().iter() {
            if context.contains(keyword) {
                for name in *names {
                    if tools.contains_key(*name) && !suggestions.contains(&name.to_string()) {
                        suggestions.push(name.to_string());
                    }
                }
            }
        }
        suggestions
    }

    /// Looks up the handler regardless of activation state, invokes it, and
    /// records usage/timing — the concrete C12 "call-tool" dispatch primitive.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, BrokerError> {
        let (tool_name, handler) = {
            let tools = self.tools.read().await;
            let Some(r) = tools.get(name) else {
                return Err(unknown_tool_error(name));
            };
            (r.tool.name.clone(), r.handler.clone())
        };

        let started = Instant::now();
        let result = handler.call(args).await;
        let succeeded = result.is_ok();
        let duration_ms = started.elapsed().as_millis() as u64;

        if succeeded {
            if let Some(r) = self.tools.read().await.get(&tool_name) {
                let new_count = r.tool.record_usage();
                self.usage.set(&tool_name, new_count).await;
            }
        }

        self.events.publish_tool_event(ToolEvent {
            tool_name: tool_name.clone(),
            invoked_at: Utc::now(),
            succeeded,
            duration_ms,
        });

        result
    }
}

fn env_var_present(name: &str) -> bool {
    std::env::var_os(name).is_some()
}

fn unknown_tool_error(name: &str) -> BrokerError {
    BrokerError::new(
        ErrorKind::ToolActivation,
        Severity::Error,
        "tool_registry",
        "invoke",
        format!("no tool named '{name}' is registered"),
    )
    .with_suggestion(Suggestion::new("call list-tools to see the currently active set"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, args: Value) -> Result<Value, BrokerError> {
            Ok(args)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ToolHandler for FailingHandler {
        async fn call(&self, _args: Value) -> Result<Value, BrokerError> {
            Err(BrokerError::new(ErrorKind::Validation, Severity::Error, "test", "call", "boom"))
        }
    }

    fn registry() -> ToolRegistry {
        let dir = tempfile::tempdir().unwrap();
        ToolRegistry::new(
            Arc::new(UsageStore::new(dir.path().join("usage.json"))),
            Arc::new(EventBus::with_default_capacity()),
        )
    }

    #[tokio::test]
    async fn discovery_tools_start_active_and_cannot_be_deactivated() {
        let registry = registry();
        let tool = Tool::new("scan-ports", "d", json!({}), ToolCategory::Discovery, 0, 1);
        registry.register(tool, Arc::new(EchoHandler)).await.unwrap();
        assert_eq!(registry.active().await.len(), 1);
        let deactivated = registry.deactivate(&["scan-ports".to_string()]).await;
        assert!(deactivated.is_empty());
        assert_eq!(registry.active().await.len(), 1);
    }

    #[tokio::test]
    async fn activation_skips_tools_missing_credential() {
        let registry = registry();
        let tool = Tool::new("gen-voice", "d", json!({}), ToolCategory::VoiceGeneration, 5, 10)
            .with_credential("NONEXISTENT_TEST_CREDENTIAL_VAR_XYZ");
        registry.register(tool, Arc::new(EchoHandler)).await.unwrap();

        let result = registry
            .activate_categories(ActivateCategoriesRequest { categories: vec![ToolCategory::VoiceGeneration], ..Default::default() })
            .await;
        assert!(result.activated.is_empty());
        assert_eq!(result.skipped_missing_credential, vec!["gen-voice".to_string()]);
    }

    #[tokio::test]
    async fn invoke_records_usage_on_success_only() {
        let registry = registry();
        registry.register(Tool::new("echo", "d", json!({}), ToolCategory::Maintenance, 0, 1), Arc::new(EchoHandler)).await.unwrap();
        registry.register(Tool::new("fail", "d", json!({}), ToolCategory::Maintenance, 0, 1), Arc::new(FailingHandler)).await.unwrap();

        registry.invoke("echo", json!({"a": 1})).await.unwrap();
        assert!(registry.invoke("fail", json!({})).await.is_err());

        let stats = registry.usage_stats().await;
        assert_eq!(stats.get("echo"), Some(&1));
        assert!(stats.get("fail").is_none());
    }

    #[tokio::test]
    async fn search_filters_by_tag_and_truncates_to_limit() {
        let registry = registry();
        registry
            .register(Tool::new("a", "d", json!({}), ToolCategory::VideoCreation, 0, 1).with_tags(["render"]), Arc::new(EchoHandler))
            .await
            .unwrap();
        registry
            .register(Tool::new("b", "d", json!({}), ToolCategory::VideoCreation, 1, 1).with_tags(["render"]), Arc::new(EchoHandler))
            .await
            .unwrap();
        registry
            .register(Tool::new("c", "d", json!({}), ToolCategory::VideoCreation, 2, 1), Arc::new(EchoHandler))
            .await
            .unwrap();

        let results = registry
            .search(SearchQuery { tags: vec!["render".to_string()], limit: Some(1), ..Default::default() })
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "a");
    }

    #[tokio::test]
    async fn suggest_filters_to_registered_names() {
        let registry = registry();
        registry
            .register(Tool::new("launch-remotion-studio", "d", json!({}), ToolCategory::StudioManagement, 0, 1), Arc::new(EchoHandler))
            .await
            .unwrap();
        let suggestions = registry.suggest("help me with my studio").await;
        assert_eq!(suggestions, vec!["launch-remotion-studio".to_string()]);
    }

    // Property test for spec §8 invariant 1: every discovery-category tool
    // stays in the active set no matter which sequence of deactivate calls
    // (by name, or via an exclusive activate_categories sweep) runs afterward.
    mod props {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            DeactivateByName,
            ExclusiveActivateOther,
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![Just(Op::DeactivateByName), Just(Op::ExclusiveActivateOther)]
        }

        proptest! {
            #[test]
            fn discovery_tools_always_stay_active(ops in prop::collection::vec(op_strategy(), 0..8)) {
                tokio_test::block_on(async {
                    let registry = registry();
                    registry
                        .register(Tool::new("scan-ports", "d", json!({}), ToolCategory::Discovery, 0, 1), Arc::new(EchoHandler))
                        .await
                        .unwrap();
                    registry
                        .register(Tool::new("render-composition", "d", json!({}), ToolCategory::VideoCreation, 5, 10), Arc::new(EchoHandler))
                        .await
                        .unwrap();

                    for op in ops {
                        match op {
                            Op::DeactivateByName => {
                                registry.deactivate(&["scan-ports".to_string()]).await;
                            }
                            Op::ExclusiveActivateOther => {
                                registry
                                    .activate_categories(ActivateCategoriesRequest {
                                        categories: vec![ToolCategory::VideoCreation],
                                        exclusive: true,
                                        ..Default::default()
                                    })
                                    .await;
                            }
                        }
                    }

                    prop_assert!(registry.active().await.iter().any(|t| t.name == "scan-ports"));
                    Ok(())
                })?;
            }
        }
    }
}
