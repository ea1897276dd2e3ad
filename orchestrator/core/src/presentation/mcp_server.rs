// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Host-channel adapter (C12, spec §6 "Host protocol"): implements
//! [`rmcp::ServerHandler`] over stdio, delegating `list_tools`/`call_tool`
//! straight to [`crate::application::broker::Broker`]. This is the only
//! module that touches the wire format the spec treats as opaque — it does
//! no validation or business logic of its own (spec §4.9, §5 "Host-channel
//! rule").

use std::future::Future;
use std::pin::Pin;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData, ListToolsResult, PaginatedRequestParam, ServerCapabilities, ServerInfo,
    Tool as RmcpTool, ToolsCapability,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ServerHandler;

use crate::application::broker::Broker;
use crate::domain::error::BrokerError;
use std::sync::Arc;

/// Thin `ServerHandler` wrapping a [`Broker`]. Holds no state beyond the
/// broker it forwards to.
#[derive(Clone)]
pub struct McpServer {
    broker: Arc<Broker>,
}

impl McpServer {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities { tools: Some(ToolsCapability { list_changed: Some(true) }), ..Default::default() },
            instructions: Some(
                "A tool broker for a motion-graphics renderer. Call discover-tools to see which \
                 layers are worth activating before reaching for studio-management or video-creation tools."
                    .to_string(),
            ),
            ..Default::default()
        }
    }

    fn list_tools<'a>(
        &'a self,
        _params: Option<PaginatedRequestParam>,
        _ctx: RequestContext<RoleServer>,
    ) -> Pin<Box<dyn Future<Output = Result<ListToolsResult, ErrorData>> + Send + 'a>> {
        Box::pin(async move {
            let tools = self.broker.list_tools().await;
            let tools = tools
                .into_iter()
                .map(|t| RmcpTool {
                    name: t.name.into(),
                    title: None,
                    description: Some(t.description.into()),
                    input_schema: Arc::new(object_schema(t.input_schema)),
                    output_schema: None,
                    icons: None,
                    annotations: None,
                    execution: None,
                    meta: None,
                })
                .collect();
            Ok(ListToolsResult { tools, next_cursor: None })
        })
    }

    fn call_tool<'a>(
        &'a self,
        params: CallToolRequestParam,
        _ctx: RequestContext<RoleServer>,
    ) -> Pin<Box<dyn Future<Output = Result<CallToolResult, ErrorData>> + Send + 'a>> {
        Box::pin(async move {
            let arguments = params.arguments.map(serde_json::Value::Object).unwrap_or(serde_json::Value::Null);
            match self.broker.call_tool(&params.name, arguments).await {
                Ok(value) => Ok(CallToolResult::success(vec![Content::json(value).unwrap_or_else(|_| Content::text(""))])),
                Err(err) => Ok(error_result(err)),
            }
        })
    }
}

/// Downcasts a `serde_json::Value` into the `Map<String, Value>` rmcp's
/// `Tool::input_schema` expects, defaulting to an empty object schema.
fn object_schema(schema: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match schema {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

/// Maps a [`BrokerError`] to an MCP tool-call error result (spec §7
/// "serialized to a transport error with a message and a structured
/// `details` object"). Recoverable conditions are returned as structured
/// call results, never thrown across the wire (spec §7 propagation policy).
fn error_result(err: BrokerError) -> CallToolResult {
    let details = serde_json::to_value(&err.details).unwrap_or(serde_json::Value::Null);
    CallToolResult::error(vec![Content::json(serde_json::json!({
        "message": err.to_string(),
        "details": details,
    }))
    .unwrap_or_else(|_| Content::text(err.to_string()))])
}
