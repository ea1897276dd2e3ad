// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Layer domain type (spec §3, §4.7).
//!
//! A [`Layer`] is a named grouping of tools. The layer manager
//! ([`crate::application::layer_manager`]) owns *references* to tools by
//! name only — "layers never own tools" (spec §3) — the same ownership
//! split the teacher draws between `ToolServer` (owned by the registry) and
//! `ToolRouter`'s capability index (which only indexes names).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

/// Governs which layers may be active simultaneously (spec §3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusivityPolicy {
    Shared,
    Selective,
    Exclusive,
    /// Never deactivated regardless of request (spec §4.7 step 2).
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerState {
    Inactive,
    Activating,
    Active,
    Deactivating,
    Error,
}

/// Illegal transitions raised by [`Layer::transition`].
#[derive(Debug, thiserror::Error)]
pub enum LayerDomainError {
    #[error("layer {layer_id} cannot transition {from:?} -> {to:?}")]
    InvalidTransition {
        layer_id: String,
        from: LayerState,
        to: LayerState,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    pub name: String,
    pub description: String,
    pub member_tools: HashSet<String>,
    /// Ids of layers that must be active whenever this one is (spec §3).
    pub dependencies: HashSet<String>,
    pub exclusivity: ExclusivityPolicy,
    /// Used only when `exclusivity == Selective` (spec §3).
    pub compatible_with: HashSet<String>,
    /// Sum of member tool weights, cached at definition time.
    pub context_weight: u32,
    pub priority: i32,
    pub state: LayerState,
    /// How many times this layer has been activated (feeds recommendation scoring).
    pub activation_count: u32,
}

impl Layer {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        exclusivity: ExclusivityPolicy,
        priority: i32,
    ) -> Self {
        let state = if matches!(exclusivity, ExclusivityPolicy::Permanent) {
            LayerState::Active
        } else {
            LayerState::Inactive
        };
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            member_tools: HashSet::new(),
            dependencies: HashSet::new(),
            exclusivity,
            compatible_with: HashSet::new(),
            context_weight: 0,
            priority,
            state,
            activation_count: 0,
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.member_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_compatible<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compatible_with = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context_weight(mut self, weight: u32) -> Self {
        self.context_weight = weight;
        self
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, LayerState::Active)
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self.exclusivity, ExclusivityPolicy::Permanent)
    }

    /// Validated state transition; the allowed edges mirror the teacher's
    /// `ToolServerStatus`/`InvocationStatus` machines in `domain::mcp`.
    pub fn transition(&mut self, to: LayerState) -> Result<(), LayerDomainError> {
        use LayerState::*;
        let allowed = matches!(
            (self.state, to),
            (Inactive, Activating)
                | (Activating, Active)
                | (Activating, Error)
                | (Active, Deactivating)
                | (Deactivating, Inactive)
                | (Deactivating, Error)
                | (Error, Inactive)
        );
        if !allowed {
            return Err(LayerDomainError::InvalidTransition {
                layer_id: self.id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        if to == LayerState::Active {
            self.activation_count += 1;
        }
        Ok(())
    }
}

/// Detects cycles in a layer dependency graph via depth-first search.
///
/// In strict mode a cycle is an error (spec §4.7 step 1, §9 "Cyclic
/// graphs"); in lenient mode the caller should log a warning and proceed.
pub fn detect_cycle(
    layers: &std::collections::HashMap<String, Layer>,
    start: &str,
) -> Result<(), DomainError> {
    fn visit(
        layers: &std::collections::HashMap<String, Layer>,
        id: &str,
        visiting: &mut HashSet<String>,
        visited: &mut HashSet<String>,
    ) -> Result<(), DomainError> {
        if visited.contains(id) {
            return Ok(());
        }
        if !visiting.insert(id.to_string()) {
            return Err(DomainError::CyclicDependency { layer_id: id.to_string() });
        }
        if let Some(layer) = layers.get(id) {
            for dep in &layer.dependencies {
                visit(layers, dep, visiting, visited)?;
            }
        }
        visiting.remove(id);
        visited.insert(id.to_string());
        Ok(())
    }

    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();
    visit(layers, start, &mut visiting, &mut visited)
}

/// Transitive dependency closure of a set of requested layer ids
/// (spec §4.7 step 1), depth-first.
pub fn dependency_closure(
    layers: &std::collections::HashMap<String, Layer>,
    requested: &[String],
) -> HashSet<String> {
    let mut closure: HashSet<String> = requested.iter().cloned().collect();
    let mut stack: Vec<String> = requested.to_vec();
    while let Some(id) = stack.pop() {
        if let Some(layer) = layers.get(&id) {
            for dep in &layer.dependencies {
                if closure.insert(dep.clone()) {
                    stack.push(dep.clone());
                }
            }
        }
    }
    closure
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn permanent_layer_starts_active() {
        let layer = Layer::new("discovery", "Discovery", "", ExclusivityPolicy::Permanent, 0);
        assert!(layer.is_active());
    }

    #[test]
    fn valid_transition_sequence() {
        let mut layer = Layer::new("l1", "L1", "", ExclusivityPolicy::Shared, 5);
        layer.transition(LayerState::Activating).unwrap();
        layer.transition(LayerState::Active).unwrap();
        assert_eq!(layer.activation_count, 1);
        layer.transition(LayerState::Deactivating).unwrap();
        layer.transition(LayerState::Inactive).unwrap();
        assert_eq!(layer.state, LayerState::Inactive);
    }

    #[test]
    fn invalid_transition_rejected() {
        let mut layer = Layer::new("l1", "L1", "", ExclusivityPolicy::Shared, 5);
        assert!(layer.transition(LayerState::Active).is_err());
    }

    #[test]
    fn cycle_detection() {
        let mut layers = HashMap::new();
        layers.insert(
            "a".to_string(),
            Layer::new("a", "A", "", ExclusivityPolicy::Shared, 0).with_dependencies(["b"]),
        );
        layers.insert(
            "b".to_string(),
            Layer::new("b", "B", "", ExclusivityPolicy::Shared, 0).with_dependencies(["a"]),
        );
        assert!(detect_cycle(&layers, "a").is_err());
    }

    #[test]
    fn closure_is_transitive() {
        let mut layers = HashMap::new();
        layers.insert(
            "a".to_string(),
            Layer::new("a", "A", "", ExclusivityPolicy::Shared, 0).with_dependencies(["b"]),
        );
        layers.insert(
            "b".to_string(),
            Layer::new("b", "B", "", ExclusivityPolicy::Shared, 0).with_dependencies(["c"]),
        );
        layers.insert("c".to_string(), Layer::new("c", "C", "", ExclusivityPolicy::Shared, 0));
        let closure = dependency_closure(&layers, &["a".to_string()]);
        assert!(closure.contains("a") && closure.contains("b") && closure.contains("c"));
    }
}
