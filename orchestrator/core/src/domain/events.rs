// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Domain events published to observers (spec §4.6, §4.7) — the tool-broker
//! analogue of the teacher's `infrastructure::event_bus::DomainEvent`, kept
//! as plain data so both the in-process event bus and the audit log can
//! consume the same shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::context_item::Pressure;
use crate::domain::layer::LayerState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerEvent {
    pub layer_id: String,
    pub from: LayerState,
    pub to: LayerState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEvent {
    pub pressure: Pressure,
    pub current_weight: u32,
    pub max_weight: u32,
    pub evicted: Vec<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    pub tool_name: String,
    pub invoked_at: DateTime<Utc>,
    pub succeeded: bool,
    pub duration_ms: u64,
}

/// Top-level envelope published on [`crate::infrastructure::event_bus::EventBus`],
/// mirroring the teacher's tagged `DomainEvent` enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Layer(LayerEvent),
    Context(ContextEvent),
    Tool(ToolEvent),
}
