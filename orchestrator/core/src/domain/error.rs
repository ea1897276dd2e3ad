// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Error taxonomy for the broker boundary (spec §7).
//!
//! Every component-level error (`RoutingError`, `PortError`, `PipelineError`,
//! ...) is raised close to where it occurs, the way the teacher's
//! `RuntimeError`/`RoutingError`/`ManagerError` live next to their owning
//! modules. [`BrokerError`] is the single envelope that wraps any of them at
//! the call boundary before they reach the host channel (C12), carrying the
//! category/severity/suggestions shape spec.md §7 requires.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed taxonomy of error categories (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Filesystem,
    Dependency,
    Studio,
    ToolActivation,
    Validation,
    Network,
    ResumableTimeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "Configuration",
            Self::Filesystem => "Filesystem",
            Self::Dependency => "Dependency",
            Self::Studio => "Studio",
            Self::ToolActivation => "ToolActivation",
            Self::Validation => "Validation",
            Self::Network => "Network",
            Self::ResumableTimeout => "ResumableTimeout",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A single actionable remediation suggestion attached to an error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub action: String,
    pub command: Option<String>,
    pub documentation_url: Option<String>,
    pub priority: u8,
}

impl Suggestion {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            command: None,
            documentation_url: None,
            priority: 0,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// The structured `details` object carried alongside every `BrokerError`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub kind: ErrorKind,
    pub suggestions: Vec<Suggestion>,
    /// Present only for `ErrorKind::ResumableTimeout`; the caller retries with this id.
    pub operation_id: Option<String>,
}

/// Context envelope wrapping a low-level error at the broker boundary (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub component: String,
    pub operation: String,
    pub message: String,
    pub details: ErrorDetails,
    pub timestamp: DateTime<Utc>,
}

impl BrokerError {
    pub fn new(
        kind: ErrorKind,
        severity: Severity,
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            component: component.into(),
            operation: operation.into(),
            message: message.into(),
            details: ErrorDetails {
                kind,
                suggestions: Vec::new(),
                operation_id: None,
            },
            timestamp: Utc::now(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.details.suggestions.push(suggestion);
        self
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.details.operation_id = Some(operation_id.into());
        self
    }

    /// A `ResumableTimeout` is not a failure; it is the expected shape of a
    /// checkpointed transform awaiting retry (spec §4.5, §8 property 5).
    pub fn resumable_timeout(operation_id: impl Into<String>, stage: impl fmt::Display) -> Self {
        let operation_id = operation_id.into();
        Self::new(
            ErrorKind::ResumableTimeout,
            Severity::Info,
            "transform_pipeline",
            "transform",
            format!("transform paused at stage {stage}; retry with the same operationId"),
        )
        .with_operation_id(operation_id)
    }

    pub fn is_resumable_timeout(&self) -> bool {
        self.kind == ErrorKind::ResumableTimeout
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}: {}", self.component, self.operation, self.kind, self.message)
    }
}

impl std::error::Error for BrokerError {}

/// Illegal domain-level conditions raised by pure value objects, distinct
/// from the call-boundary [`BrokerError`] — mirrors the teacher's small
/// `domain::mcp::DomainError` kept next to `ToolServer`'s state machine.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("cyclic layer dependency detected at {layer_id}")]
    CyclicDependency { layer_id: String },
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Helper for constructing the `TimeoutExceeded`-style suggestion text shared
/// by several components (studio launch, stage budgets).
pub fn timeout_suggestion(what: &str, budget: Duration) -> Suggestion {
    Suggestion::new(format!(
        "{what} exceeded its {:.1}s budget; retry or raise the configured timeout",
        budget.as_secs_f64()
    ))
    .with_priority(1)
}
