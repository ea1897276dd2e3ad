// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Composition root (spec §9 "Global mutable state" — "Expose them via a
//! composition-root object; forbid module-level state in components").
//!
//! Wires the per-process singletons (registry, layer manager, context
//! manager, checkpoint store) together, seeds the built-in tool catalog and
//! layer groupings, and registers the handlers that let the broker's
//! `call_tool` dispatch actually reach C3–C8. Mirrors the teacher's
//! `repository_factory`/`runtime` pattern of a single struct built once at
//! startup and disposed at shutdown, rather than module-level statics.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::application::broker::Broker;
use crate::application::context_manager::ContextManager;
use crate::application::layer_manager::LayerManager;
use crate::application::studio_lifecycle::{LaunchOptions, ShutdownRequest, StudioLifecycle};
use crate::application::tool_registry::{ToolHandler, ToolRegistry};
use crate::application::transform_pipeline::{TransformPipeline, TransformRequest};
use crate::domain::config::Config;
use crate::domain::error::{BrokerError, ErrorKind, Severity, Suggestion};
use crate::domain::layer::{ExclusivityPolicy, Layer};
use crate::domain::tool::{Tool, ToolCategory};
use crate::infrastructure::checkpoint_store::CheckpointStore;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::port_allocator::PortAllocator;
use crate::infrastructure::process_discovery::ProcessDiscovery;
use crate::infrastructure::process_spawner::ProcessSpawner;
use crate::infrastructure::usage_store::UsageStore;

/// Everything a running broker process needs, constructed once at startup
/// (spec §9) and torn down on graceful shutdown (SPEC_FULL "Graceful
/// shutdown").
pub struct Composition {
    pub config: Config,
    pub registry: Arc<ToolRegistry>,
    pub layers: Arc<LayerManager>,
    pub context: Arc<ContextManager>,
    pub studio: Arc<StudioLifecycle>,
    pub transforms: Arc<TransformPipeline>,
    pub checkpoints: Arc<CheckpointStore>,
    pub events: Arc<EventBus>,
    pub broker: Arc<Broker>,
}

impl Composition {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.assets_dir)?;

        let events = Arc::new(EventBus::with_default_capacity());
        let usage = Arc::new(UsageStore::new(config.usage_stats_path()));
        if let Err(e) = usage.load().await {
            tracing::warn!(error = %e, "failed to load usage stats, starting empty");
        }

        let checkpoints_path = checkpoint_file_path(&config);
        let checkpoints = Arc::new(CheckpointStore::new(checkpoints_path));
        if let Err(e) = checkpoints.load().await {
            tracing::warn!(error = %e, "failed to load checkpoint store, starting empty");
        }
        checkpoints.purge_expired().await;

        let thresholds = crate::domain::context_item::PressureThresholds {
            warning: config.context.warning,
            critical: config.context.critical,
        };
        let strategy = match config.context.strategy {
            crate::domain::config::EvictionStrategyName::Lru => crate::domain::context_item::OptimizationStrategy::Lru,
            crate::domain::config::EvictionStrategyName::Lfu => crate::domain::context_item::OptimizationStrategy::Lfu,
            crate::domain::config::EvictionStrategyName::Priority => crate::domain::context_item::OptimizationStrategy::Priority,
            crate::domain::config::EvictionStrategyName::Smart => crate::domain::context_item::OptimizationStrategy::Smart,
        };
        let context = Arc::new(
            ContextManager::new(config.context.max_weight, thresholds, strategy, events.clone())
                .with_auto_optimize(config.context.auto_optimize),
        );

        let registry = Arc::new(ToolRegistry::new(usage, events.clone()));
        let layers = Arc::new(LayerManager::new(context.clone(), events.clone(), config.layers.track_history));

        let ports = PortAllocator::new(config.port_range.start, config.port_range.end, config.port_range.deny.clone());
        let discovery = ProcessDiscovery::new(config.port_range.start, config.port_range.end);
        let spawner = ProcessSpawner::new("npx", "remotion");
        let studio = Arc::new(StudioLifecycle::new(ports, discovery, spawner));

        let transforms = Arc::new(TransformPipeline::new(checkpoints.clone()));

        register_builtin_tools(&registry, studio.clone(), transforms.clone(), &config).await;
        define_builtin_layers(&layers).await;

        let broker = Arc::new(Broker::new(registry.clone()));

        Ok(Self { config, registry, layers, context, studio, transforms, checkpoints, events, broker })
    }

    /// Flushes persisted state and shuts down every studio this process
    /// launched (SPEC_FULL "Graceful shutdown").
    pub async fn shutdown(&self) {
        let _ = self.studio.shutdown(ShutdownRequest { all: true, force: true, ..Default::default() }).await;
        self.registry.flush_usage_stats().await;
        self.checkpoints.flush().await;
    }
}

fn checkpoint_file_path(config: &Config) -> std::path::PathBuf {
    config.assets_dir.join(".mcp-checkpoints.json")
}

struct DiscoverToolsHandler {
    registry: Arc<ToolRegistry>,
}

#[async_trait::async_trait]
impl ToolHandler for DiscoverToolsHandler {
    async fn call(&self, _args: Value) -> Result<Value, BrokerError> {
        let categories = self.registry.categories().await;
        Ok(json!({ "categories": categories.iter().map(|c| format!("{c:?}")).collect::<Vec<_>>() }))
    }
}

struct LaunchStudioHandler {
    studio: Arc<StudioLifecycle>,
}

#[async_trait::async_trait]
impl ToolHandler for LaunchStudioHandler {
    async fn call(&self, args: Value) -> Result<Value, BrokerError> {
        let project_path = args
            .get("projectPath")
            .and_then(Value::as_str)
            .ok_or_else(|| missing_arg("launch-remotion-studio", "projectPath"))?;
        let opts = LaunchOptions {
            project_path: project_path.into(),
            preferred_port: args.get("preferredPort").and_then(Value::as_u64).map(|p| p as u16),
            force_new_instance: args.get("forceNewInstance").and_then(Value::as_bool).unwrap_or(false),
            timeout: args.get("timeout").and_then(Value::as_u64).map(std::time::Duration::from_millis),
            validate: args.get("validate").and_then(Value::as_bool).unwrap_or(true),
        };
        let result = self.studio.launch(opts).await?;
        Ok(json!({
            "success": true,
            "reused": result.reused,
            "port": result.process.port,
            "pid": result.process.pid,
        }))
    }
}

struct ShutdownStudioHandler {
    studio: Arc<StudioLifecycle>,
}

#[async_trait::async_trait]
impl ToolHandler for ShutdownStudioHandler {
    async fn call(&self, args: Value) -> Result<Value, BrokerError> {
        let req = ShutdownRequest {
            port: args.get("port").and_then(Value::as_u64).map(|p| p as u16),
            pid: args.get("pid").and_then(Value::as_u64).map(|p| p as u32),
            all: args.get("all").and_then(Value::as_bool).unwrap_or(false),
            force: args.get("force").and_then(Value::as_bool).unwrap_or(false),
        };
        let result = self.studio.shutdown(req).await;
        Ok(json!({ "terminated": result.terminated }))
    }
}

struct StudioStatusHandler {
    studio: Arc<StudioLifecycle>,
}

#[async_trait::async_trait]
impl ToolHandler for StudioStatusHandler {
    async fn call(&self, _args: Value) -> Result<Value, BrokerError> {
        let processes = self.studio.status().await;
        Ok(serde_json::to_value(processes).unwrap_or(Value::Null))
    }
}

struct CleanupStudioHandler {
    studio: Arc<StudioLifecycle>,
}

#[async_trait::async_trait]
impl ToolHandler for CleanupStudioHandler {
    async fn call(&self, _args: Value) -> Result<Value, BrokerError> {
        let killed = self.studio.cleanup().await;
        Ok(json!({ "killed": killed }))
    }
}

struct TransformSourceHandler {
    pipeline: Arc<TransformPipeline>,
}

#[async_trait::async_trait]
impl ToolHandler for TransformSourceHandler {
    async fn call(&self, args: Value) -> Result<Value, BrokerError> {
        let operation_id = args
            .get("operationId")
            .and_then(Value::as_str)
            .ok_or_else(|| missing_arg("transform-component-source", "operationId"))?
            .to_string();
        let project_name = args.get("projectName").and_then(Value::as_str).unwrap_or("untitled").to_string();
        let source = args
            .get("source")
            .and_then(Value::as_str)
            .ok_or_else(|| missing_arg("transform-component-source", "source"))?
            .to_string();
        let outcome = self.pipeline.transform(TransformRequest { operation_id, project_name, source }).await?;
        Ok(json!({ "output": outcome.output, "duplicateExports": outcome.duplicate_exports }))
    }
}

/// A stub adapter for a credential-gated third-party media API (spec §1
/// "explicitly out of scope... invoked through a thin adapter"). Returns a
/// structured `Dependency` error describing the missing credential rather
/// than making a network call this crate has no business making without one.
struct CredentialGatedStub {
    tool_name: &'static str,
    env_var: &'static str,
    has_credential: bool,
    audio_enabled: bool,
}

#[async_trait::async_trait]
impl ToolHandler for CredentialGatedStub {
    async fn call(&self, _args: Value) -> Result<Value, BrokerError> {
        if !self.audio_enabled {
            return Err(BrokerError::new(
                ErrorKind::Dependency,
                Severity::Warning,
                "tool_registry",
                self.tool_name,
                format!("{} is disabled (AUDIO_ENABLED is false)", self.tool_name),
            )
            .with_suggestion(Suggestion::new("set AUDIO_ENABLED=true to enable audio generation tools")));
        }
        if !self.has_credential {
            return Err(BrokerError::new(
                ErrorKind::Dependency,
                Severity::Warning,
                "tool_registry",
                self.tool_name,
                format!("{} requires a credential that is not configured", self.tool_name),
            )
            .with_suggestion(Suggestion::new(format!("set the {} environment variable", self.env_var))));
        }
        Err(BrokerError::new(
            ErrorKind::Network,
            Severity::Error,
            "tool_registry",
            self.tool_name,
            "third-party media API adapters are outside this crate's scope",
        ))
    }
}

fn missing_arg(tool: &str, arg: &str) -> BrokerError {
    BrokerError::new(
        ErrorKind::Validation,
        Severity::Error,
        "tool_registry",
        tool,
        format!("missing required argument '{arg}'"),
    )
}

fn input_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

async fn register_builtin_tools(
    registry: &Arc<ToolRegistry>,
    studio: Arc<StudioLifecycle>,
    transforms: Arc<TransformPipeline>,
    config: &Config,
) {
    let discovery_tools = [
        Tool::new(
            "discover-tools",
            "Lists tool categories and recommends layers for a task",
            input_schema(json!({}), &[]),
            ToolCategory::Discovery,
            0,
            20,
        )
        .load_by_default(true),
    ];
    for tool in discovery_tools {
        registry
            .register(tool, Arc::new(DiscoverToolsHandler { registry: registry.clone() }))
            .await
            .expect("builtin tool names are unique");
    }

    let studio_tools: [(Tool, Arc<dyn ToolHandler>); 4] = [
        (
            Tool::new(
                "launch-remotion-studio",
                "Launches or reuses a renderer studio bound to a project",
                input_schema(
                    json!({
                        "projectPath": {"type": "string"},
                        "preferredPort": {"type": "integer"},
                        "forceNewInstance": {"type": "boolean"},
                        "timeout": {"type": "integer"},
                        "validate": {"type": "boolean"},
                    }),
                    &["projectPath"],
                ),
                ToolCategory::StudioManagement,
                10,
                120,
            ),
            Arc::new(LaunchStudioHandler { studio: studio.clone() }),
        ),
        (
            Tool::new(
                "shutdown-studio",
                "Shuts down one or all running studio instances",
                input_schema(
                    json!({"port": {"type": "integer"}, "pid": {"type": "integer"}, "all": {"type": "boolean"}, "force": {"type": "boolean"}}),
                    &[],
                ),
                ToolCategory::StudioManagement,
                11,
                40,
            ),
            Arc::new(ShutdownStudioHandler { studio: studio.clone() }),
        ),
        (
            Tool::new(
                "studio-status",
                "Lists currently tracked studio processes",
                input_schema(json!({}), &[]),
                ToolCategory::StudioManagement,
                12,
                30,
            ),
            Arc::new(StudioStatusHandler { studio: studio.clone() }),
        ),
        (
            Tool::new(
                "cleanup-studio",
                "Terminates studios whose process has exited unresponsively",
                input_schema(json!({}), &[]),
                ToolCategory::Maintenance,
                50,
                30,
            ),
            Arc::new(CleanupStudioHandler { studio }),
        ),
    ];
    for (tool, handler) in studio_tools {
        registry.register(tool, handler).await.expect("builtin tool names are unique");
    }

    let transform_tool = Tool::new(
        "transform-component-source",
        "Runs the resumable cleaning/validation/export pipeline over component source",
        input_schema(
            json!({"operationId": {"type": "string"}, "projectName": {"type": "string"}, "source": {"type": "string"}}),
            &["operationId", "source"],
        ),
        ToolCategory::VideoCreation,
        20,
        200,
    );
    registry
        .register(transform_tool, Arc::new(TransformSourceHandler { pipeline: transforms }))
        .await
        .expect("builtin tool names are unique");

    // generate-image is unaffected by AUDIO_ENABLED (spec §6: the flag only
    // names audio); voice/sound-effect tools are additionally gated by it.
    let credential_gated = [
        ("generate-voiceover", "ELEVENLABS_API_KEY", ToolCategory::VoiceGeneration, config.api_keys.has_elevenlabs(), config.audio_enabled),
        ("generate-sound-effect", "FREESOUND_API_KEY", ToolCategory::SoundEffects, config.api_keys.has_freesound(), config.audio_enabled),
        ("generate-image", "FLUX_API_KEY", ToolCategory::ImageGeneration, config.api_keys.has_flux(), true),
    ];
    for (name, env_var, category, has_credential, audio_enabled) in credential_gated {
        let tool = Tool::new(name, format!("Calls the {name} third-party media API"), input_schema(json!({}), &[]), category, 30, 60)
            .with_credential(env_var);
        registry
            .register(tool, Arc::new(CredentialGatedStub { tool_name: name, env_var, has_credential, audio_enabled }))
            .await
            .expect("builtin tool names are unique");
    }
}

async fn define_builtin_layers(layers: &Arc<LayerManager>) {
    layers
        .define(
            Layer::new("discovery", "Discovery", "Always-on tool discovery surface", ExclusivityPolicy::Permanent, 0)
                .with_tools(["discover-tools"])
                .with_context_weight(20),
        )
        .await;
    layers
        .define(
            Layer::new("studio-management", "Studio Management", "Launch, reuse, and shut down renderer studios", ExclusivityPolicy::Shared, 10)
                .with_tools(["launch-remotion-studio", "shutdown-studio", "studio-status", "cleanup-studio"])
                .with_context_weight(220),
        )
        .await;
    layers
        .define(
            Layer::new("video-creation", "Video Creation", "Component source transformation and export", ExclusivityPolicy::Selective, 20)
                .with_tools(["transform-component-source"])
                .with_dependencies(["studio-management"])
                .with_compatible(["studio-management"])
                .with_context_weight(200),
        )
        .await;
    layers
        .define(
            Layer::new("media-generation", "Media Generation", "Credential-gated voice/sound/image adapters", ExclusivityPolicy::Shared, 30)
                .with_tools(["generate-voiceover", "generate-sound-effect", "generate-image"])
                .with_context_weight(180),
        )
        .await;
}
