// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Context item domain type and pressure model (spec §3, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Tool,
    Layer,
}

/// A record tracked by the context manager (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,
    pub item_type: ItemType,
    pub weight: u32,
    pub priority: i32,
    pub last_used: DateTime<Utc>,
    pub usage_count: u32,
    pub added_at: DateTime<Utc>,
    /// Required items can never be evicted (spec §3, §4.6 invariants).
    pub required: bool,
}

impl ContextItem {
    pub fn new(id: impl Into<String>, item_type: ItemType, weight: u32, priority: i32, required: bool) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            item_type,
            weight,
            priority,
            last_used: now,
            usage_count: 0,
            added_at: now,
            required,
        }
    }

    pub fn mark_used(&mut self) {
        self.last_used = Utc::now();
        self.usage_count += 1;
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.added_at).num_seconds().max(0) as f64 / 3600.0
    }

    pub fn idle_since_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_used).num_seconds().max(0) as f64 / 3600.0
    }
}

/// Discretized ratio of current weight to the configured maximum (spec §4.6, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pressure {
    Low,
    Medium,
    High,
    Critical,
}

/// Thresholds governing [`Pressure`] classification (spec §4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PressureThresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self { warning: 0.75, critical: 0.9 }
    }
}

impl PressureThresholds {
    pub fn classify(&self, current: u32, max: u32) -> Pressure {
        if max == 0 {
            return Pressure::Critical;
        }
        let ratio = current as f64 / max as f64;
        if ratio >= self.critical {
            Pressure::Critical
        } else if ratio >= self.warning {
            Pressure::High
        } else if ratio >= 0.5 {
            Pressure::Medium
        } else {
            Pressure::Low
        }
    }
}

/// Eviction strategy selectable for `ContextManager::optimize` (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    Lru,
    Lfu,
    Priority,
    Smart,
}

impl Default for OptimizationStrategy {
    fn default() -> Self {
        Self::Smart
    }
}

/// Smart-strategy weighted score (spec §4.6): higher score evicts first.
pub fn smart_score(item: &ContextItem, now: DateTime<Utc>, max_weight: u32) -> f64 {
    let age_term = 0.3 * item.age_hours(now);
    let usage_term = 0.3 * (1.0 / (item.usage_count as f64 + 1.0));
    let priority_term = 0.2 * ((10 - item.priority.clamp(0, 10)) as f64 / 10.0);
    let weight_term = 0.2 * (item.weight as f64 / max_weight.max(1) as f64);
    age_term + usage_term + priority_term + weight_term
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_thresholds_classify_correctly() {
        let t = PressureThresholds::default();
        assert_eq!(t.classify(100, 1000), Pressure::Low);
        assert_eq!(t.classify(600, 1000), Pressure::Medium);
        assert_eq!(t.classify(800, 1000), Pressure::High);
        assert_eq!(t.classify(950, 1000), Pressure::Critical);
    }

    #[test]
    fn smart_score_favors_old_unused_low_priority_heavy_items() {
        let now = Utc::now();
        let mut stale = ContextItem::new("a", ItemType::Tool, 900, 9, false);
        stale.added_at = now - chrono::Duration::hours(5);
        stale.last_used = now - chrono::Duration::hours(5);
        let fresh = ContextItem::new("b", ItemType::Tool, 10, 0, false);
        assert!(smart_score(&stale, now, 1000) > smart_score(&fresh, now, 1000));
    }

    #[test]
    fn smart_score_age_term_uses_time_since_added_not_time_since_last_used() {
        let now = Utc::now();
        let mut item = ContextItem::new("a", ItemType::Tool, 100, 5, false);
        item.added_at = now - chrono::Duration::hours(10);
        item.last_used = now - chrono::Duration::minutes(1);

        // usage_count=0 -> 0.3; priority=5 -> 0.1; weight=100/1000 -> 0.02.
        let expected = 0.3 * 10.0 + 0.3 + 0.1 + 0.02;
        assert!((smart_score(&item, now, 1000) - expected).abs() < 1e-9);
    }
}
