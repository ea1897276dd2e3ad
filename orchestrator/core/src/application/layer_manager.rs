// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Layer Manager (C10, spec §4.7): grouped tool activation honoring
//! dependencies and exclusivity. Sits above the context manager (C9), which
//! sits above the tool registry (C11) — this module only knows tools by
//! name, never owns them (spec §3 ownership rules).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::application::context_manager::ContextManager;
use crate::domain::events::LayerEvent;
use crate::domain::layer::{dependency_closure, detect_cycle, ExclusivityPolicy, Layer, LayerState};
use crate::domain::context_item::ItemType;
use crate::infrastructure::event_bus::EventBus;

const DEFAULT_HISTORY_CAPACITY: usize = 200;

#[derive(Debug, Error)]
pub enum LayerManagerError {
    #[error("cyclic dependency detected among requested layers")]
    CyclicDependency,
    #[error("unknown layer id: {0}")]
    UnknownLayer(String),
    #[error("activating the requested layers would exceed the context budget and autoDeactivate is disabled")]
    ContextLimitExceeded,
    #[error("layer transition failed: {0}")]
    Transition(#[from] crate::domain::layer::LayerDomainError),
}

#[derive(Debug, Clone, Default)]
pub struct ActivateOptions {
    pub force: bool,
    pub respect_exclusivity: bool,
    pub requested_by: Option<String>,
    pub reason: Option<String>,
    pub auto_deactivate: bool,
    pub strict_cycles: bool,
}

#[derive(Debug, Clone)]
pub struct ActivateResult {
    pub activated: Vec<String>,
    pub deactivated: Vec<String>,
    pub projected_weight: u32,
}

#[derive(Debug, Clone)]
pub struct DeactivateResult {
    pub deactivated: Vec<String>,
    pub expanded: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Recommendation {
    pub layer_id: String,
    pub confidence: f64,
    pub reason: String,
    pub relevant_tools: Vec<String>,
    pub context_weight: u32,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub layer_id: String,
    pub reason: Option<String>,
    pub requester: Option<String>,
    pub resulting_weight: u32,
    pub success: bool,
}

pub struct LayerManager {
    layers: RwLock<HashMap<String, Layer>>,
    context: Arc<ContextManager>,
    events: Arc<EventBus>,
    history: Mutex<VecDeque<HistoryEntry>>,
    history_capacity: usize,
    track_history: bool,
    /// Serializes concurrent activate/deactivate calls so transitions never
    /// interleave across calls (spec §5 ordering guarantees).
    call_lock: Mutex<()>,
}

impl LayerManager {
    pub fn new(context: Arc<ContextManager>, events: Arc<EventBus>, track_history: bool) -> Self {
        Self {
            layers: RwLock::new(HashMap::new()),
            context,
            events,
            history: Mutex::new(VecDeque::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            track_history,
            call_lock: Mutex::new(()),
        }
    }

    pub async fn define(&self, layer: Layer) {
        let is_active = layer.is_active();
        let id = layer.id.clone();
        let weight = layer.context_weight;
        self.layers.write().await.insert(id.clone(), layer);
        if is_active {
            self.context.add(id, ItemType::Layer, weight, 0, true).await;
        }
    }

    pub async fn active(&self) -> Vec<Layer> {
        self.layers.read().await.values().filter(|l| l.is_active()).cloned().collect()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn activate(&self, layer_ids: &[String], opts: ActivateOptions) -> Result<ActivateResult, LayerManagerError> {
        let _serialize = self.call_lock.lock().await;
        let mut layers = self.layers.write().await;

        for id in &self.cycle_check_targets(&layers, layer_ids, opts.strict_cycles)? {
            if !layers.contains_key(id) {
                return Err(LayerManagerError::UnknownLayer(id.clone()));
            }
        }

        let closure = dependency_closure(&layers, layer_ids);

        let mut deactivate_set: HashSet<String> = HashSet::new();
        if opts.respect_exclusivity {
            for id in &closure {
                let Some(layer) = layers.get(id) else { continue };
                match layer.exclusivity {
                    ExclusivityPolicy::Exclusive => {
                        for (other_id, other) in layers.iter() {
                            if other.is_active() && !other.is_permanent() && !closure.contains(other_id) {
                                deactivate_set.insert(other_id.clone());
                            }
                        }
                    }
                    ExclusivityPolicy::Selective => {
                        for (other_id, other) in layers.iter() {
                            if other.is_active()
                                && !other.is_permanent()
                                && !closure.contains(other_id)
                                && !layer.compatible_with.contains(other_id)
                            {
                                deactivate_set.insert(other_id.clone());
                            }
                        }
                    }
                    ExclusivityPolicy::Shared | ExclusivityPolicy::Permanent => {}
                }
            }
        }
        deactivate_set.retain(|id| layers.get(id).map(|l| !l.is_permanent()).unwrap_or(false));

        let newly_activating: Vec<String> = closure
            .iter()
            .filter(|id| layers.get(*id).map(|l| !l.is_active()).unwrap_or(false))
            .cloned()
            .collect();

        let current_weight: u32 = layers.values().filter(|l| l.is_active()).map(|l| l.context_weight).sum();
        let deactivating_weight: u32 = deactivate_set.iter().filter_map(|id| layers.get(id)).map(|l| l.context_weight).sum();
        let activating_weight: u32 = newly_activating.iter().filter_map(|id| layers.get(id)).map(|l| l.context_weight).sum();
        let mut projected = current_weight - deactivating_weight + activating_weight;

        let max_weight = self.context.statistics().await.max_weight;
        if projected > max_weight {
            if opts.auto_deactivate {
                let overage = projected - max_weight;
                let result = self.context.optimize(Some(max_weight.saturating_sub(overage))).await;
                projected -= result.freed_weight.min(projected);
            } else if !opts.force {
                return Err(LayerManagerError::ContextLimitExceeded);
            }
        }

        // Deactivations first, then activations (spec §5 ordering guarantee).
        let mut deactivated = Vec::new();
        for id in &deactivate_set {
            if let Some(layer) = layers.get_mut(id) {
                self.transition_layer(layer, LayerState::Deactivating).await?;
                self.transition_layer(layer, LayerState::Inactive).await?;
                self.context.remove(id).await;
                deactivated.push(id.clone());
            }
        }

        let mut activated = Vec::new();
        for id in &newly_activating {
            if let Some(layer) = layers.get_mut(id) {
                self.transition_layer(layer, LayerState::Activating).await?;
                self.transition_layer(layer, LayerState::Active).await?;
                self.context.add(id.clone(), ItemType::Layer, layer.context_weight, layer.priority, false).await;
                activated.push(id.clone());
            }
        }

        if self.track_history {
            let mut history = self.history.lock().await;
            for id in &activated {
                push_history(
                    &mut history,
                    self.history_capacity,
                    HistoryEntry {
                        timestamp: Utc::now(),
                        action: "activate".to_string(),
                        layer_id: id.clone(),
                        reason: opts.reason.clone(),
                        requester: opts.requested_by.clone(),
                        resulting_weight: projected,
                        success: true,
                    },
                );
            }
        }

        Ok(ActivateResult { activated, deactivated, projected_weight: projected })
    }

    pub async fn deactivate(&self, layer_ids: &[String]) -> Result<DeactivateResult, LayerManagerError> {
        let _serialize = self.call_lock.lock().await;
        let mut layers = self.layers.write().await;
        let requested: HashSet<String> = layer_ids.iter().cloned().collect();

        // Dependent-deactivation expansion: every active layer whose
        // dependency set intersects the requested set is pulled in too
        // (spec §4.7 "Dependent-deactivation"), with a warning.
        let mut expanded = requested.clone();
        let mut changed = true;
        while changed {
            changed = false;
            for (id, layer) in layers.iter() {
                if layer.is_active() && !expanded.contains(id) && layer.dependencies.iter().any(|d| expanded.contains(d)) {
                    expanded.insert(id.clone());
                    changed = true;
                }
            }
        }
        let newly_expanded: Vec<String> = expanded.difference(&requested).cloned().collect();
        if !newly_expanded.is_empty() {
            tracing::warn!(expanded = ?newly_expanded, "deactivate() expanded to dependent layers");
        }

        let mut deactivated = Vec::new();
        for id in &expanded {
            let Some(layer) = layers.get_mut(id) else { continue };
            if layer.is_permanent() || !layer.is_active() {
                continue;
            }
            self.transition_layer(layer, LayerState::Deactivating).await?;
            self.transition_layer(layer, LayerState::Inactive).await?;
            self.context.remove(id).await;
            deactivated.push(id.clone());
        }

        Ok(DeactivateResult { deactivated, expanded: newly_expanded })
    }

    /// Scoring per spec §4.7 "Recommendation scoring".
    pub async fn recommend(&self, context: &str, limit: usize) -> Vec<Recommendation> {
        let query = context.to_lowercase();
        let layers = self.layers.read().await;
        let mut scored: Vec<Recommendation> = layers
            .values()
            .map(|layer| {
                let mut score = 0.0;
                if layer.name.to_lowercase().contains(&query) {
                    score += 0.5;
                }
                if layer.description.to_lowercase().contains(&query) {
                    score += 0.3;
                }
                let matched_tools: Vec<String> =
                    layer.member_tools.iter().filter(|t| t.to_lowercase().contains(&query)).cloned().collect();
                score += 0.2 * matched_tools.len() as f64;
                score += (layer.activation_count as f64 / 100.0).min(0.2);
                let score = score.min(1.0);
                Recommendation {
                    layer_id: layer.id.clone(),
                    confidence: score,
                    reason: format!("matched query '{context}'"),
                    relevant_tools: matched_tools,
                    context_weight: layer.context_weight,
                }
            })
            .filter(|r| r.confidence > 0.0)
            .collect();
        scored.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    async fn transition_layer(&self, layer: &mut Layer, to: LayerState) -> Result<(), LayerManagerError> {
        let from = layer.state;
        layer.transition(to)?;
        self.events.publish_layer_event(LayerEvent { layer_id: layer.id.clone(), from, to, at: Utc::now() });
        Ok(())
    }

    fn cycle_check_targets(
        &self,
        layers: &HashMap<String, Layer>,
        requested: &[String],
        strict: bool,
    ) -> Result<Vec<String>, LayerManagerError> {
        if strict {
            for id in requested {
                if detect_cycle(layers, id).is_err() {
                    return Err(LayerManagerError::CyclicDependency);
                }
            }
        }
        Ok(requested.to_vec())
    }
}

fn push_history(history: &mut VecDeque<HistoryEntry>, capacity: usize, entry: HistoryEntry) {
    if history.len() >= capacity {
        history.pop_front();
    }
    history.push_back(entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context_item::{OptimizationStrategy, PressureThresholds};
    use crate::domain::layer::ExclusivityPolicy;

    fn test_manager() -> LayerManager {
        let events = Arc::new(EventBus::with_default_capacity());
        let context = Arc::new(ContextManager::new(10_000, PressureThresholds::default(), OptimizationStrategy::Smart, events.clone()));
        LayerManager::new(context, events, true)
    }

    #[tokio::test]
    async fn activating_exclusive_layer_deactivates_others() {
        let mgr = test_manager();
        let mut shared = Layer::new("discovery", "Discovery", "", ExclusivityPolicy::Permanent, 0);
        shared.state = LayerState::Active;
        mgr.define(shared).await;

        let mut a = Layer::new("video", "Video Creation", "", ExclusivityPolicy::Exclusive, 5).with_context_weight(100);
        a.state = LayerState::Active;
        mgr.define(a).await;

        let b = Layer::new("voice", "Voice Generation", "", ExclusivityPolicy::Exclusive, 5).with_context_weight(100);
        mgr.define(b).await;

        let result = mgr
            .activate(&["voice".to_string()], ActivateOptions { respect_exclusivity: true, ..Default::default() })
            .await
            .unwrap();
        assert!(result.activated.contains(&"voice".to_string()));
        assert!(result.deactivated.contains(&"video".to_string()));
        assert!(mgr.active().await.iter().any(|l| l.id == "discovery"));
    }

    #[tokio::test]
    async fn deactivate_expands_to_dependents() {
        let mgr = test_manager();
        let mut base = Layer::new("base", "Base", "", ExclusivityPolicy::Shared, 0);
        base.state = LayerState::Active;
        mgr.define(base).await;

        let mut dependent = Layer::new("dep", "Dependent", "", ExclusivityPolicy::Shared, 0).with_dependencies(["base"]);
        dependent.state = LayerState::Active;
        mgr.define(dependent).await;

        let result = mgr.deactivate(&["base".to_string()]).await.unwrap();
        assert!(result.deactivated.contains(&"dep".to_string()));
        assert!(result.expanded.contains(&"dep".to_string()));
    }

    #[tokio::test]
    async fn recommend_scores_name_and_description_matches() {
        let mgr = test_manager();
        let layer = Layer::new("video", "Video Creation", "creates motion graphics video", ExclusivityPolicy::Shared, 0);
        mgr.define(layer).await;
        let recs = mgr.recommend("video", 10).await;
        assert_eq!(recs.len(), 1);
        assert!(recs[0].confidence >= 0.8);
    }
}
