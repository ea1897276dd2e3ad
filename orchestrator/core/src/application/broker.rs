// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Broker Front-End (C12, spec §4.9): the only component permitted to
//! exchange messages with the host channel. Accepts exactly two operation
//! classes — list-tools and call-tool — and never writes anything to the
//! host other than protocol messages (spec §5 "Host-channel rule"); every
//! diagnostic goes through `tracing` to the file sink instead.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::application::tool_registry::ToolRegistry;
use crate::domain::error::BrokerError;
use crate::domain::tool::Tool;

/// The exact shape `list_tools` hands back to the host (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl From<&Tool> for ToolSummary {
    fn from(tool: &Tool) -> Self {
        Self { name: tool.name.clone(), description: tool.description.clone(), input_schema: tool.input_schema.clone() }
    }
}

/// Thin host-channel adapter. Holds no state of its own beyond the registry
/// it dispatches to, mirroring the teacher's `ToolServer::start()` boundary
/// that never does more than translate between wire and domain shapes.
pub struct Broker {
    registry: Arc<ToolRegistry>,
}

impl Broker {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// `list-tools`: returns `active()` exactly, re-shaped to the wire
    /// contract (spec §4.9, §6).
    pub async fn list_tools(&self) -> Vec<ToolSummary> {
        self.registry.active().await.iter().map(ToolSummary::from).collect()
    }

    /// `call-tool`: looks up the handler by name (regardless of active
    /// state) and invokes it with the already-validated argument object.
    /// Errors are returned as-is; the caller (presentation layer) is
    /// responsible for serializing the `BrokerError` envelope onto the wire.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BrokerError> {
        tracing::debug!(tool = %name, "dispatching call-tool");
        self.registry.invoke(name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::application::tool_registry::ToolHandler;
    use crate::domain::tool::ToolCategory;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::usage_store::UsageStore;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, args: Value) -> Result<Value, BrokerError> {
            Ok(args)
        }
    }

    async fn broker_with_one_tool() -> Broker {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ToolRegistry::new(
            Arc::new(UsageStore::new(dir.path().join("usage.json"))),
            Arc::new(EventBus::with_default_capacity()),
        ));
        registry
            .register(
                Tool::new("echo", "echoes its arguments", json!({"type": "object"}), ToolCategory::Maintenance, 0, 1).load_by_default(true),
                Arc::new(EchoHandler),
            )
            .await
            .unwrap();
        Broker::new(registry)
    }

    #[tokio::test]
    async fn list_tools_mirrors_active_set() {
        let broker = broker_with_one_tool().await;
        let tools = broker.list_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }

    #[tokio::test]
    async fn call_tool_dispatches_to_the_handler() {
        let broker = broker_with_one_tool().await;
        let result = broker.call_tool("echo", json!({"a": 1})).await.unwrap();
        assert_eq!(result, json!({"a": 1}));
    }

    #[tokio::test]
    async fn call_tool_reports_unknown_names() {
        let broker = broker_with_one_tool().await;
        let err = broker.call_tool("nonexistent", json!({})).await.unwrap_err();
        assert_eq!(err.kind, crate::domain::error::ErrorKind::ToolActivation);
    }
}
